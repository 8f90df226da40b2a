//! Fleet core library: domain types, wire payloads, configuration, errors.
//!
//! - [`types`]: host snapshots, hub records, ingest payloads
//! - [`config`]: agent and hub configuration (load / save / overrides)
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{AgentConfig, HubConfig};
pub use error::ConfigError;
pub use types::{
    AuditEvent, AuditFilter, AuditResult, CertStatus, CertificateRecord, CertificateReport,
    ContainerRecord, ContainerSnapshot, DomainReport, DomainRoute, HeartbeatPayload, HostId,
    HostIdentity, HostRecord, HostStatus, StoredAuditEvent, SyncAck, TrafficRecord, TrafficStat,
};
