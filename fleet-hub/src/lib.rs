//! Fleet hub: aggregate store, audit merge, and the HTTP API agents report to.

pub mod audit_merge;
mod error;
pub mod http;
mod runtime;
pub mod store;

pub use audit_merge::{merge_events, paginate, AuditPage, ExportFormat, Page};
pub use error::HubError;
pub use http::{build_router, AppState};
pub use runtime::{run, serve_with_shutdown, start_blocking};
pub use store::{HubStore, TrafficQuery};
