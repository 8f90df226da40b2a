use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the aggregate store, HTTP layer, and runtime.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("local audit log error: {0}")]
    LocalAudit(#[from] fleet_agent::SyncError),

    #[error("{0}")]
    NotFound(String),

    #[error("invalid agent token")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("export error: {0}")]
    Export(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> HubError {
    HubError::Io {
        path: path.into(),
        source,
    }
}
