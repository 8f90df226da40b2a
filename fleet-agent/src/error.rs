//! Error types for fleet-agent.

use std::path::PathBuf;

use thiserror::Error;

use fleet_core::ConfigError;

/// All errors that can arise from collecting or transmitting host state.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Agent configuration could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local audit database error.
    #[error("audit database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The hub could not be reached (DNS, connect, timeout, TLS).
    #[error("hub unreachable: {0}")]
    Transport(String),

    /// The hub answered with a non-success status.
    #[error("hub returned HTTP {status}: {body}")]
    Hub { status: u16, body: String },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
