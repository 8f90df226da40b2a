use std::net::SocketAddr;

use tokio::net::TcpListener;

use fleet_core::HubConfig;

use crate::error::{io_err, HubError};
use crate::http::{build_router, AppState};
use crate::store::HubStore;

/// Blocking entry point for the hub server.
pub fn start_blocking(config: HubConfig) -> Result<(), HubError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Open the store, bind, and serve until ctrl-c.
pub async fn run(config: HubConfig) -> Result<(), HubError> {
    let listener = TcpListener::bind(&config.bind)
        .await
        .map_err(|e| io_err(&config.bind, e))?;
    let addr = listener
        .local_addr()
        .map_err(|e| io_err(&config.bind, e))?;
    serve(listener, config, shutdown_signal(), addr).await
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    config: HubConfig,
    shutdown: F,
) -> Result<(), HubError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().map_err(|e| io_err("listener", e))?;
    serve(listener, config, shutdown, addr).await
}

async fn serve<F>(
    listener: TcpListener,
    config: HubConfig,
    shutdown: F,
    addr: SocketAddr,
) -> Result<(), HubError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let store = HubStore::open(&config.db_path)?;
    let local_audit = config.local_audit_db.filter(|path| path.exists());
    if let Some(path) = &local_audit {
        tracing::info!(path = %path.display(), "merging colocated agent audit log");
    }
    if config.api_token.is_empty() {
        tracing::warn!("no api token configured; agent endpoints are unauthenticated");
    }

    let state = AppState::new(store, &config.api_token, local_audit);
    let app = build_router(state);

    tracing::info!(%addr, db = %config.db_path.display(), "hub listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| io_err(addr.to_string(), e))?;
    tracing::info!("hub stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received ctrl-c, shutting down hub"),
        Err(err) => tracing::error!(error = %err, "ctrl-c handler failed"),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
