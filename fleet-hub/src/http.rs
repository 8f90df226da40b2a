//! HTTP surface of the hub: agent ingest, fleet management, read paths.
//!
//! Every route except `/health` requires `Authorization: Bearer <token>`
//! when a token is configured.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};

use fleet_agent::LocalAuditLog;
use fleet_core::types::{
    AuditPayload, CertsPayload, ContainersPayload, DomainsPayload, TrafficPayload,
};
use fleet_core::{
    AuditResult, CertificateRecord, ContainerRecord, DomainRoute, HeartbeatPayload, HostId,
    HostRecord, StoredAuditEvent, SyncAck, TrafficRecord,
};

use crate::audit_merge::{merge_events, paginate, AuditFilter, AuditPage, ExportFormat, Page};
use crate::error::HubError;
use crate::store::{HubStore, TrafficQuery};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Mutex<HubStore>>,
    /// Audit database of an agent on the same machine, merged into reads.
    pub local_audit: Option<PathBuf>,
    /// Empty disables authentication.
    pub api_token: Arc<str>,
}

impl AppState {
    pub fn new(store: HubStore, api_token: &str, local_audit: Option<PathBuf>) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            local_audit,
            api_token: Arc::from(api_token),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
        .route("/agent/heartbeat", post(heartbeat))
        .route("/agent/containers-sync", post(containers_sync))
        .route("/agent/certs-sync", post(certs_sync))
        .route("/agent/domains-sync", post(domains_sync))
        .route("/agent/audit-sync", post(audit_sync))
        .route("/agent/traffic-sync", post(traffic_sync))
        .route("/agent/vps", get(list_vps))
        .route("/agent/vps/{vps_id}", get(get_vps).delete(remove_vps))
        .route("/containers", get(list_containers))
        .route("/certs", get(list_certificates))
        .route("/domains", get(list_domains))
        .route("/traffic", get(list_traffic))
        .route("/audit-logs", get(list_audit))
        .route("/audit-logs/export", get(export_audit))
        .layer(middleware::from_fn_with_state(state.clone(), require_token))
        .with_state(state)
}

async fn require_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, HubError> {
    if req.uri().path() == "/health" || state.api_token.is_empty() {
        return Ok(next.run(req).await);
    }
    if bearer_token(req.headers()) != Some(&*state.api_token) {
        tracing::warn!(path = %req.uri().path(), "rejected request with invalid agent token");
        return Err(HubError::Unauthorized);
    }
    Ok(next.run(req).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = match &self {
            HubError::Unauthorized => StatusCode::UNAUTHORIZED,
            HubError::NotFound(_) => StatusCode::NOT_FOUND,
            HubError::BadRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        let detail = match &self {
            HubError::Unauthorized => "Invalid agent token".to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Agent ingest
// ---------------------------------------------------------------------------

async fn heartbeat(
    State(state): State<AppState>,
    payload: Result<Json<HeartbeatPayload>, JsonRejection>,
) -> Result<Json<Value>, HubError> {
    let Json(payload) = payload?;
    state.store.lock().heartbeat(&payload)?;
    tracing::debug!(vps_id = %payload.id, "heartbeat");
    Ok(Json(json!({"status": "ok"})))
}

async fn containers_sync(
    State(state): State<AppState>,
    payload: Result<Json<ContainersPayload>, JsonRejection>,
) -> Result<Json<SyncAck>, HubError> {
    let Json(payload) = payload?;
    let synced = state
        .store
        .lock()
        .replace_containers(&payload.vps_id, &payload.containers)?;
    Ok(Json(SyncAck { synced }))
}

async fn certs_sync(
    State(state): State<AppState>,
    payload: Result<Json<CertsPayload>, JsonRejection>,
) -> Result<Json<SyncAck>, HubError> {
    let Json(payload) = payload?;
    let synced = state.store.lock().reconcile_certificates(&payload.certs)?;
    tracing::info!(vps_id = %payload.vps_id, synced, "certificates reconciled");
    Ok(Json(SyncAck { synced }))
}

async fn domains_sync(
    State(state): State<AppState>,
    payload: Result<Json<DomainsPayload>, JsonRejection>,
) -> Result<Json<SyncAck>, HubError> {
    let Json(payload) = payload?;
    let synced = state
        .store
        .lock()
        .reconcile_domains(&payload.vps_id, &payload.domains)?;
    tracing::info!(vps_id = %payload.vps_id, synced, "domains reconciled");
    Ok(Json(SyncAck { synced }))
}

async fn audit_sync(
    State(state): State<AppState>,
    payload: Result<Json<AuditPayload>, JsonRejection>,
) -> Result<Json<SyncAck>, HubError> {
    let Json(payload) = payload?;
    let synced = state.store.lock().append_audit(&payload.events)?;
    Ok(Json(SyncAck { synced }))
}

async fn traffic_sync(
    State(state): State<AppState>,
    payload: Result<Json<TrafficPayload>, JsonRejection>,
) -> Result<Json<SyncAck>, HubError> {
    let Json(payload) = payload?;
    let synced = state
        .store
        .lock()
        .append_traffic(&payload.vps_id, &payload.stats)?;
    Ok(Json(SyncAck { synced }))
}

// ---------------------------------------------------------------------------
// Fleet management
// ---------------------------------------------------------------------------

async fn list_vps(State(state): State<AppState>) -> Result<Json<Vec<HostRecord>>, HubError> {
    Ok(Json(state.store.lock().list_vps()?))
}

async fn get_vps(
    State(state): State<AppState>,
    Path(vps_id): Path<String>,
) -> Result<Json<HostRecord>, HubError> {
    let host = HostId::from(vps_id);
    state
        .store
        .lock()
        .get_vps(&host)?
        .map(Json)
        .ok_or_else(|| HubError::NotFound(format!("VPS '{host}' not found")))
}

async fn remove_vps(
    State(state): State<AppState>,
    Path(vps_id): Path<String>,
) -> Result<Json<Value>, HubError> {
    let host = HostId::from(vps_id);
    if !state.store.lock().remove_vps(&host)? {
        return Err(HubError::NotFound(format!("VPS '{host}' not found")));
    }
    tracing::info!(vps_id = %host, "vps removed");
    Ok(Json(json!({"status": "ok", "vps_id": host})))
}

// ---------------------------------------------------------------------------
// Read paths
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct HostQuery {
    vps_id: Option<String>,
}

impl HostQuery {
    fn host(&self) -> Option<HostId> {
        self.vps_id
            .as_deref()
            .filter(|v| !v.is_empty())
            .map(HostId::from)
    }
}

async fn list_containers(
    State(state): State<AppState>,
    query: Result<Query<HostQuery>, QueryRejection>,
) -> Result<Json<Vec<ContainerRecord>>, HubError> {
    let Query(query) = query?;
    Ok(Json(state.store.lock().list_containers(query.host().as_ref())?))
}

async fn list_certificates(
    State(state): State<AppState>,
) -> Result<Json<Vec<CertificateRecord>>, HubError> {
    Ok(Json(state.store.lock().list_certificates()?))
}

async fn list_domains(
    State(state): State<AppState>,
    query: Result<Query<HostQuery>, QueryRejection>,
) -> Result<Json<Vec<DomainRoute>>, HubError> {
    let Query(query) = query?;
    Ok(Json(state.store.lock().list_domains(query.host().as_ref())?))
}

#[derive(Debug, Default, Deserialize)]
struct TrafficParams {
    vps_id: Option<String>,
    domain: Option<String>,
    limit: Option<usize>,
}

async fn list_traffic(
    State(state): State<AppState>,
    query: Result<Query<TrafficParams>, QueryRejection>,
) -> Result<Json<Vec<TrafficRecord>>, HubError> {
    let Query(params) = query?;
    let query = TrafficQuery {
        vps_id: params.vps_id.filter(|v| !v.is_empty()).map(HostId::from),
        domain: params.domain.filter(|v| !v.is_empty()),
        limit: params.limit,
    };
    Ok(Json(state.store.lock().list_traffic(&query)?))
}

/// Filters plus paging and export parameters, as sent in the query string.
#[derive(Debug, Default, Deserialize)]
struct AuditParams {
    actor: Option<String>,
    action: Option<String>,
    target: Option<String>,
    result: Option<AuditResult>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    page: Option<u32>,
    per_page: Option<u32>,
    format: Option<String>,
}

impl AuditParams {
    fn filter(&self) -> AuditFilter {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        AuditFilter {
            actor: non_empty(&self.actor),
            action: non_empty(&self.action),
            target: non_empty(&self.target),
            result: self.result,
            since: self.since,
            until: self.until,
        }
    }
}

async fn list_audit(
    State(state): State<AppState>,
    query: Result<Query<AuditParams>, QueryRejection>,
) -> Result<Json<AuditPage>, HubError> {
    let Query(params) = query?;
    let page = Page::from_query(params.page, params.per_page)?;
    let merged = merged_audit(&state, &params.filter())?;
    Ok(Json(paginate(merged, page)))
}

async fn export_audit(
    State(state): State<AppState>,
    query: Result<Query<AuditParams>, QueryRejection>,
) -> Result<Response, HubError> {
    let Query(params) = query?;
    let format = ExportFormat::parse(params.format.as_deref().unwrap_or("csv"))?;
    let merged = merged_audit(&state, &params.filter())?;
    let body = format.render(&merged)?;
    let disposition = format!("attachment; filename={}", format.file_name());
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// Local rows (when a colocated audit database exists) merged with the
/// agent-synced rows, both filtered the same way.
fn merged_audit(state: &AppState, filter: &AuditFilter) -> Result<Vec<StoredAuditEvent>, HubError> {
    let local = match &state.local_audit {
        Some(path) => match LocalAuditLog::open_existing(path)? {
            Some(log) => log.query(filter)?,
            None => Vec::new(),
        },
        None => Vec::new(),
    };
    let remote = state.store.lock().query_audit(filter)?;
    Ok(merge_events(local, remote))
}

impl From<QueryRejection> for HubError {
    fn from(err: QueryRejection) -> Self {
        HubError::BadRequest(err.body_text())
    }
}

impl From<JsonRejection> for HubError {
    fn from(err: JsonRejection) -> Self {
        HubError::BadRequest(err.body_text())
    }
}
