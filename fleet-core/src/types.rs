//! Domain types shared by the agent, the hub, and the CLI.
//!
//! Wire field names follow the hub ingest API (`vps_id`, `ip_address`,
//! `avg_request_time_ms`, ...). Types that exist on both sides of the wire
//! are defined once here.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for a managed host (`vps_id` on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct HostId(pub String);

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for HostId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for HostId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl HostId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Computed validity of a TLS certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CertStatus {
    #[default]
    Valid,
    Expired,
    Unknown,
}

impl fmt::Display for CertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CertStatus::Valid => "valid",
            CertStatus::Expired => "expired",
            CertStatus::Unknown => "unknown",
        }
    }

    /// Lenient parse used when reading rows back from storage.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "valid" => CertStatus::Valid,
            "expired" => CertStatus::Expired,
            _ => CertStatus::Unknown,
        }
    }
}

/// Outcome recorded on an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    #[default]
    Success,
    Failure,
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AuditResult {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditResult::Success => "success",
            AuditResult::Failure => "failure",
        }
    }

    pub fn parse_lenient(s: &str) -> Self {
        if s == "failure" {
            AuditResult::Failure
        } else {
            AuditResult::Success
        }
    }
}

/// Liveness of a host as tracked by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    #[default]
    Active,
    Inactive,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostStatus::Active => write!(f, "active"),
            HostStatus::Inactive => write!(f, "inactive"),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshots reported by agents
// ---------------------------------------------------------------------------

/// Self-reported identity of a host. Doubles as the heartbeat payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostIdentity {
    #[serde(rename = "vps_id")]
    pub id: HostId,
    #[serde(default)]
    pub hostname: String,
    /// Empty when the hostname could not be resolved.
    #[serde(rename = "ip_address", default)]
    pub ip: String,
}

/// Heartbeat body: the identity itself.
pub type HeartbeatPayload = HostIdentity;

/// One container as seen by the local container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContainerSnapshot {
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub ports: String,
}

/// Certificate entry as reported by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateReport {
    pub domain: String,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    /// RFC 3339 when the agent could parse it, the raw string otherwise.
    #[serde(default)]
    pub expiry: Option<String>,
    #[serde(default)]
    pub status: CertStatus,
}

pub const DEFAULT_ISSUER: &str = "Let's Encrypt";

fn default_issuer() -> String {
    DEFAULT_ISSUER.to_string()
}

/// Reverse-proxy route as reported by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainReport {
    pub domain: String,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Aggregated access-log counters for one domain over one read window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TrafficStat {
    pub domain: String,
    pub requests: u64,
    pub status_2xx: u64,
    pub status_3xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
    pub bytes_sent: u64,
    pub avg_request_time_ms: u64,
    /// Timestamp of the first record read this cycle, verbatim from the log.
    pub period_start: String,
    pub period_end: String,
}

/// A single auditable operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "vps_id", default)]
    pub host_id: HostId,
    #[serde(default)]
    pub actor: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub target: String,
    #[serde(default = "empty_object")]
    pub params: Value,
    #[serde(default)]
    pub result: AuditResult,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl AuditEvent {
    /// Start a new event stamped with the current time and a `success` result.
    pub fn new(host_id: HostId, actor: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            host_id,
            actor: actor.into(),
            action: action.into(),
            target: String::new(),
            params: empty_object(),
            result: AuditResult::Success,
            error: None,
            duration_ms: None,
        }
    }
}

/// An audit event together with its row id in the store it was read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAuditEvent {
    pub id: i64,
    #[serde(flatten)]
    pub event: AuditEvent,
}

// ---------------------------------------------------------------------------
// Hub ingest payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainersPayload {
    pub vps_id: HostId,
    #[serde(default)]
    pub containers: Vec<ContainerSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertsPayload {
    pub vps_id: HostId,
    #[serde(default)]
    pub certs: Vec<CertificateReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainsPayload {
    pub vps_id: HostId,
    #[serde(default)]
    pub domains: Vec<DomainReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditPayload {
    #[serde(default)]
    pub events: Vec<AuditEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficPayload {
    pub vps_id: HostId,
    #[serde(default)]
    pub stats: Vec<TrafficStat>,
}

/// Standard acknowledgement returned by the sync endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncAck {
    pub synced: usize,
}

// ---------------------------------------------------------------------------
// Hub-side records
// ---------------------------------------------------------------------------

/// A registered host as stored by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub vps_id: HostId,
    pub hostname: String,
    pub ip_address: String,
    pub status: HostStatus,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub vps_id: HostId,
    #[serde(flatten)]
    pub container: ContainerSnapshot,
}

/// Global certificate row, keyed by domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub domain: String,
    pub issuer: String,
    pub expiry: Option<DateTime<Utc>>,
    pub status: CertStatus,
}

/// Domain route row, keyed by domain and owned by exactly one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRoute {
    pub domain: String,
    pub vps_id: HostId,
    pub container: String,
    pub port: u16,
    pub status: String,
}

/// Append-only traffic fact row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficRecord {
    pub vps_id: HostId,
    pub domain: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub requests: u64,
    pub status_2xx: u64,
    pub status_3xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
    pub bytes_sent: u64,
    pub avg_request_time_ms: u64,
}

// ---------------------------------------------------------------------------
// Audit queries
// ---------------------------------------------------------------------------

/// Filters applied identically to every audit source before merging.
///
/// `target` is a substring match; every other field is exact. Empty strings
/// count as unset. `since` and `until` are inclusive bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AuditFilter {
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub result: Option<AuditResult>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    /// Whether `event` passes every filter. SQLite-backed sources push the
    /// column filters into SQL and apply this to the rows that come back.
    pub fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(actor) = self.actor.as_deref().filter(|s| !s.is_empty()) {
            if event.actor != actor {
                return false;
            }
        }
        if let Some(action) = self.action.as_deref().filter(|s| !s.is_empty()) {
            if event.action != action {
                return false;
            }
        }
        if let Some(target) = self.target.as_deref().filter(|s| !s.is_empty()) {
            if !event.target.contains(target) {
                return false;
            }
        }
        if let Some(result) = self.result {
            if event.result != result {
                return false;
            }
        }
        if self.since.is_some_and(|since| event.timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.timestamp > until) {
            return false;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Timestamp helpers
// ---------------------------------------------------------------------------

/// Canonical text form used for every stored timestamp.
///
/// Fixed-width microsecond precision with a `Z` suffix, so lexical order in
/// SQLite matches chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 timestamp with any offset into UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
