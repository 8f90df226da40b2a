//! One sync cycle: six collect → transmit → persist steps.
//!
//! Steps run in a fixed order and never abort each other. The cursor is
//! only advanced (in memory and on disk) after the hub accepted the data it
//! covers.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

use fleet_core::types::{
    AuditPayload, CertsPayload, ContainersPayload, DomainsPayload, TrafficPayload,
};
use fleet_core::{AgentConfig, HostId};

use crate::collectors::audit::local_max_id;
use crate::collectors::{
    collect_certificates, collect_containers, collect_domain_routes, collect_identity,
    collect_traffic_deltas, collect_unsent_audit_events, CertificateSource, ComposeCertSource,
    ContainerRuntime, DockerCli,
};
use crate::cursor::{CursorStore, SyncCursor};
use crate::error::SyncError;
use crate::hub_client::HubClient;

// ---------------------------------------------------------------------------
// Steps and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStep {
    Heartbeat,
    Containers,
    Certificates,
    Domains,
    AuditEvents,
    TrafficStats,
}

impl SyncStep {
    /// Execution order.
    pub const ALL: [SyncStep; 6] = [
        SyncStep::Heartbeat,
        SyncStep::Containers,
        SyncStep::Certificates,
        SyncStep::Domains,
        SyncStep::AuditEvents,
        SyncStep::TrafficStats,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SyncStep::Heartbeat => "Heartbeat",
            SyncStep::Containers => "Containers",
            SyncStep::Certificates => "Certificates",
            SyncStep::Domains => "Domains",
            SyncStep::AuditEvents => "Audit events",
            SyncStep::TrafficStats => "Traffic stats",
        }
    }

    pub fn endpoint(self) -> &'static str {
        match self {
            SyncStep::Heartbeat => "/agent/heartbeat",
            SyncStep::Containers => "/agent/containers-sync",
            SyncStep::Certificates => "/agent/certs-sync",
            SyncStep::Domains => "/agent/domains-sync",
            SyncStep::AuditEvents => "/agent/audit-sync",
            SyncStep::TrafficStats => "/agent/traffic-sync",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StepStatus {
    Ok { detail: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub step: SyncStep,
    #[serde(flatten)]
    pub status: StepStatus,
}

impl StepOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self.status, StepStatus::Ok { .. })
    }
}

/// Per-step results of one cycle. There is no cycle-level failure state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub dry_run: bool,
    pub steps: Vec<StepOutcome>,
}

impl CycleReport {
    pub fn failures(&self) -> usize {
        self.steps.iter().filter(|s| !s.is_ok()).count()
    }

    pub fn all_ok(&self) -> bool {
        self.failures() == 0
    }

    pub fn outcome(&self, step: SyncStep) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step == step)
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything the collectors need to observe this host.
pub struct AgentContext {
    pub host_id: HostId,
    pub vhost_dir: PathBuf,
    pub traffic_log_dir: PathBuf,
    pub audit_db_path: PathBuf,
    pub containers: Box<dyn ContainerRuntime>,
    pub certificates: Box<dyn CertificateSource>,
}

impl AgentContext {
    /// Production wiring: local docker CLI and the proxy's compose project.
    pub fn from_config(cfg: &AgentConfig) -> Self {
        Self {
            host_id: cfg.vps_id.clone(),
            vhost_dir: cfg.vhost_dir.clone(),
            traffic_log_dir: cfg.traffic_log_dir.clone(),
            audit_db_path: cfg.audit_db_path.clone(),
            containers: Box::new(DockerCli::default()),
            certificates: Box::new(ComposeCertSource::new(&cfg.proxy_compose_file)),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<C: HubClient, S: CursorStore> {
    ctx: AgentContext,
    client: C,
    store: S,
    cursor: SyncCursor,
    dry_run: bool,
}

impl<C: HubClient, S: CursorStore> Orchestrator<C, S> {
    /// Loads the cursor from `store` once; it is held in memory for the
    /// rest of the orchestrator's life.
    pub fn new(ctx: AgentContext, client: C, store: S) -> Result<Self, SyncError> {
        let cursor = store.load()?;
        Ok(Self {
            ctx,
            client,
            store,
            cursor,
            dry_run: false,
        })
    }

    /// Collect everything but neither transmit nor persist.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn cursor(&self) -> &SyncCursor {
        &self.cursor
    }

    pub fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport {
            dry_run: self.dry_run,
            steps: Vec::with_capacity(SyncStep::ALL.len()),
        };
        for step in SyncStep::ALL {
            let status = match self.run_step(step) {
                Ok(detail) => {
                    tracing::info!("{}: {detail}", step.label());
                    StepStatus::Ok { detail }
                }
                Err(e) => {
                    tracing::warn!("{} failed: {e}", step.label());
                    StepStatus::Failed {
                        error: e.to_string(),
                    }
                }
            };
            report.steps.push(StepOutcome { step, status });
        }
        report
    }

    fn run_step(&mut self, step: SyncStep) -> Result<String, SyncError> {
        match step {
            SyncStep::Heartbeat => self.sync_heartbeat(),
            SyncStep::Containers => self.sync_containers(),
            SyncStep::Certificates => self.sync_certificates(),
            SyncStep::Domains => self.sync_domains(),
            SyncStep::AuditEvents => self.sync_audit_events(),
            SyncStep::TrafficStats => self.sync_traffic_stats(),
        }
    }

    fn transmit<T: Serialize>(&self, step: SyncStep, payload: &T) -> Result<Value, SyncError> {
        if self.dry_run {
            return Ok(Value::Null);
        }
        let body = serde_json::to_value(payload)?;
        self.client.post(step.endpoint(), &body)
    }

    /// Persist `next` and adopt it. In dry-run mode neither happens.
    fn commit(&mut self, next: SyncCursor) -> Result<(), SyncError> {
        if self.dry_run {
            return Ok(());
        }
        self.store.save(&next)?;
        self.cursor = next;
        Ok(())
    }

    fn sent(&self, what: String) -> String {
        if self.dry_run {
            format!("would send {what}")
        } else {
            what
        }
    }

    fn sync_heartbeat(&mut self) -> Result<String, SyncError> {
        let identity = collect_identity(&self.ctx.host_id);
        self.transmit(SyncStep::Heartbeat, &identity)?;
        let ip = if identity.ip.is_empty() {
            "no ip"
        } else {
            identity.ip.as_str()
        };
        Ok(self.sent(format!("{} ({ip})", identity.hostname)))
    }

    fn sync_containers(&mut self) -> Result<String, SyncError> {
        let payload = ContainersPayload {
            vps_id: self.ctx.host_id.clone(),
            containers: collect_containers(self.ctx.containers.as_ref()),
        };
        self.transmit(SyncStep::Containers, &payload)?;
        Ok(self.sent(count(payload.containers.len(), "container")))
    }

    fn sync_certificates(&mut self) -> Result<String, SyncError> {
        let payload = CertsPayload {
            vps_id: self.ctx.host_id.clone(),
            certs: collect_certificates(self.ctx.certificates.as_ref()),
        };
        self.transmit(SyncStep::Certificates, &payload)?;
        Ok(self.sent(count(payload.certs.len(), "certificate")))
    }

    fn sync_domains(&mut self) -> Result<String, SyncError> {
        let payload = DomainsPayload {
            vps_id: self.ctx.host_id.clone(),
            domains: collect_domain_routes(&self.ctx.vhost_dir),
        };
        self.transmit(SyncStep::Domains, &payload)?;
        Ok(self.sent(count(payload.domains.len(), "domain")))
    }

    fn sync_audit_events(&mut self) -> Result<String, SyncError> {
        let mut next = self.cursor.clone();

        let local_max = local_max_id(&self.ctx.audit_db_path)?;
        let reset = next.detect_audit_reset(local_max);
        if reset {
            tracing::warn!(
                "audit store max id {local_max} is below cursor {}; store was reset, resending from 0",
                next.last_audit_row_id
            );
            next.reset_audit();
        }

        let (events, new_max) =
            collect_unsent_audit_events(&self.ctx.audit_db_path, next.last_audit_row_id)?;
        if events.is_empty() {
            if reset || new_max > next.last_audit_row_id {
                next.advance_audit(new_max);
                self.commit(next)?;
            }
            return Ok("no new events".to_string());
        }

        let sent = events.len();
        let payload = AuditPayload {
            events: events.into_iter().map(|stored| stored.event).collect(),
        };
        self.transmit(SyncStep::AuditEvents, &payload)?;

        next.advance_audit(new_max);
        self.commit(next)?;
        Ok(self.sent(format!("{} (through id {new_max})", count(sent, "event"))))
    }

    fn sync_traffic_stats(&mut self) -> Result<String, SyncError> {
        let deltas = collect_traffic_deltas(&self.ctx.traffic_log_dir, &self.cursor.file_offsets);
        let unreadable = if deltas.failed_files.is_empty() {
            String::new()
        } else {
            format!("; {} unreadable", count(deltas.failed_files.len(), "file"))
        };

        let mut next = self.cursor.clone();
        next.file_offsets = deltas.offsets;

        if deltas.stats.is_empty() {
            // Still persist: offsets may have been reset by rotation or pruned.
            self.commit(next)?;
            return Ok(format!("no new traffic{unreadable}"));
        }

        let payload = TrafficPayload {
            vps_id: self.ctx.host_id.clone(),
            stats: deltas.stats,
        };
        self.transmit(SyncStep::TrafficStats, &payload)?;
        self.commit(next)?;
        Ok(self.sent(format!(
            "{}{unreadable}",
            count(payload.stats.len(), "domain")
        )))
    }
}

fn count(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("1 {noun}")
    } else {
        format!("{n} {noun}s")
    }
}
