//! Collectors: read-only views of host state.
//!
//! None of these talk to the hub. Failures to observe something yield an
//! empty result (logged), except where the orchestrator needs a `Result` to
//! mark its step failed.

pub mod audit;
pub mod certificates;
pub mod containers;
pub mod domains;
pub mod identity;
pub mod traffic;

pub use audit::{collect_unsent_audit_events, AUDIT_BATCH_LIMIT};
pub use certificates::{
    collect_certificates, parse_cert_output, CertificateSource, ComposeCertSource,
};
pub use containers::{collect_containers, parse_container_lines, ContainerRuntime, DockerCli};
pub use domains::collect_domain_routes;
pub use identity::collect_identity;
pub use traffic::{collect_traffic_deltas, TrafficDeltas};
