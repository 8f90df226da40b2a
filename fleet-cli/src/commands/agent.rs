//! `fleet agent`: registration, one sync cycle, local status.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::Serialize;
use serde_json::json;
use tabled::{settings::Style, Table, Tabled};

use fleet_agent::collectors::audit::local_max_id;
use fleet_agent::{
    audited, AgentContext, CursorStore, CycleReport, FileCursorStore, HttpHubClient,
    LocalAuditLog, Orchestrator, StepStatus,
};
use fleet_core::config::{self, AgentConfig};
use fleet_core::HostId;

#[derive(Subcommand, Debug)]
pub enum AgentCommand {
    /// Save hub coordinates for this host.
    Register(RegisterArgs),
    /// Run one sync cycle against the hub.
    Sync(SyncArgs),
    /// Show the agent configuration and sync progress.
    Status(StatusArgs),
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// Hub base URL, e.g. `http://hub.internal:8000`.
    #[arg(long)]
    pub hub_url: String,

    /// Bearer token shared with the hub.
    #[arg(long)]
    pub token: String,

    /// Identifier this host reports as. Keeps the current one if omitted.
    #[arg(long)]
    pub vps_id: Option<String>,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Collect everything and print it, but send and persist nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit the cycle report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(command: AgentCommand) -> Result<()> {
    let home = config::home()?;
    match command {
        AgentCommand::Register(args) => register(&home, args),
        AgentCommand::Sync(args) => sync(&home, args),
        AgentCommand::Status(args) => status(&home, args),
    }
}

/// Agent config with `FLEET_*` environment overrides applied, validated.
pub(crate) fn load_config() -> Result<AgentConfig> {
    let cfg = config::load_agent()?;
    cfg.validate()?;
    Ok(cfg)
}

// ---------------------------------------------------------------------------
// register
// ---------------------------------------------------------------------------

fn register(home: &Path, args: RegisterArgs) -> Result<()> {
    let vps_id = args.vps_id.map(HostId::from);
    let cfg = config::register(&args.hub_url, &args.token, vps_id)
        .context("failed to register agent")?;
    println!("✓ registered {} with {}", cfg.vps_id.to_string().bold(), cfg.hub_url);
    println!("  token:  {}", cfg.masked_token());
    println!("  config: {}", config::agent_config_path_at(home).display());
    Ok(())
}

// ---------------------------------------------------------------------------
// sync
// ---------------------------------------------------------------------------

fn sync(home: &Path, args: SyncArgs) -> Result<()> {
    let cfg = load_config()?;
    let client = HttpHubClient::new(&cfg.hub_url, &cfg.token);
    let store = FileCursorStore::at_home(home);
    let mut orchestrator = Orchestrator::new(AgentContext::from_config(&cfg), client, store)
        .context("failed to load sync state")?
        .dry_run(args.dry_run);

    let report = if args.dry_run {
        orchestrator.run_cycle()
    } else {
        run_audited(&cfg, &mut orchestrator)
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize cycle report")?
        );
    } else {
        print_report(&cfg.vps_id, &report);
    }

    if !report.all_ok() {
        bail!("{} of {} sync steps failed", report.failures(), report.steps.len());
    }
    Ok(())
}

/// Run the cycle inside an `agent.sync` audit event. If the local audit
/// database cannot be opened the cycle still runs, unaudited.
fn run_audited<C, S>(cfg: &AgentConfig, orchestrator: &mut Orchestrator<C, S>) -> CycleReport
where
    C: fleet_agent::HubClient,
    S: CursorStore,
{
    let log = match LocalAuditLog::open(&cfg.audit_db_path, Some(&cfg.audit_jsonl_path)) {
        Ok(log) => log,
        Err(err) => {
            tracing::warn!(error = %err, "audit log unavailable; sync will not be recorded");
            return orchestrator.run_cycle();
        }
    };

    let mut report = None;
    let recorded = audited(
        &log,
        &cfg.vps_id,
        "agent.sync",
        &cfg.hub_url,
        json!({}),
        |event| {
            let cycle = orchestrator.run_cycle();
            let failed: Vec<_> = cycle
                .steps
                .iter()
                .filter(|s| !s.is_ok())
                .map(|s| s.step)
                .collect();
            event.params = json!({ "failed_steps": failed });
            let failures = cycle.failures();
            report = Some(cycle);
            if failures == 0 {
                Ok(())
            } else {
                Err(format!("{failures} step(s) failed"))
            }
        },
    );
    if let Err(err) = recorded {
        tracing::warn!(error = %err, "sync cycle recorded as failed");
    }
    report.unwrap_or_default()
}

fn print_report(vps_id: &HostId, report: &CycleReport) {
    let prefix = if report.dry_run { "[dry-run] " } else { "" };
    println!("{prefix}sync {}", vps_id.to_string().bold());
    for outcome in &report.steps {
        match &outcome.status {
            StepStatus::Ok { detail } => {
                println!("  {} {:<14} {detail}", "✓".green(), outcome.step.label());
            }
            StepStatus::Failed { error } => {
                println!(
                    "  {} {:<14} {}",
                    "✗".red(),
                    outcome.step.label(),
                    error.red()
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct AgentStatus {
    vps_id: String,
    hub_url: String,
    token: String,
    state_file: String,
    last_audit_row_id: i64,
    local_audit_max_id: i64,
    pending_audit_events: i64,
    tracked_log_files: usize,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "setting")]
    key: &'static str,
    #[tabled(rename = "value")]
    value: String,
}

fn status(home: &Path, args: StatusArgs) -> Result<()> {
    let cfg = load_config()?;
    let store = FileCursorStore::at_home(home);
    let cursor = store.load().context("failed to load sync state")?;
    let local_max = local_max_id(&cfg.audit_db_path).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "cannot read local audit database");
        0
    });

    let status = AgentStatus {
        vps_id: cfg.vps_id.to_string(),
        hub_url: cfg.hub_url.clone(),
        token: cfg.masked_token(),
        state_file: store.path().display().to_string(),
        last_audit_row_id: cursor.last_audit_row_id,
        local_audit_max_id: local_max,
        pending_audit_events: (local_max - cursor.last_audit_row_id).max(0),
        tracked_log_files: cursor.file_offsets.len(),
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("failed to serialize agent status")?
        );
        return Ok(());
    }

    let rows = vec![
        StatusRow { key: "vps id", value: status.vps_id },
        StatusRow { key: "hub", value: status.hub_url },
        StatusRow { key: "token", value: status.token },
        StatusRow { key: "state file", value: status.state_file },
        StatusRow {
            key: "audit cursor",
            value: status.last_audit_row_id.to_string(),
        },
        StatusRow {
            key: "pending audit events",
            value: status.pending_audit_events.to_string(),
        },
        StatusRow {
            key: "tracked log files",
            value: status.tracked_log_files.to_string(),
        },
    ];
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}
