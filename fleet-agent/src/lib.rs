//! # fleet-agent
//!
//! Host-side sync engine: collectors, the sync cursor, the local audit log,
//! and the orchestrator that ships one cycle of host state to the hub.
//!
//! Build an [`Orchestrator`] from an [`AgentContext`], a [`HubClient`], and a
//! [`CursorStore`], then call [`Orchestrator::run_cycle`].

pub mod audit_log;
pub mod collectors;
pub mod cursor;
pub mod error;
pub mod hub_client;
pub mod orchestrator;

pub use audit_log::{audited, LocalAuditLog};
pub use cursor::{CursorStore, FileCursorStore, MemoryCursorStore, SyncCursor};
pub use error::SyncError;
pub use hub_client::{HttpHubClient, HubClient};
pub use orchestrator::{
    AgentContext, CycleReport, Orchestrator, StepOutcome, StepStatus, SyncStep,
};
