//! `fleet audit`: query and export this host's audit log.
//!
//! Reads the local database only. The hub serves the fleet-wide merged view
//! at `/audit-logs`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Subcommand};
use tabled::{settings::Style, Table, Tabled};

use fleet_agent::LocalAuditLog;
use fleet_core::config::{self, DEFAULT_AUDIT_DB};
use fleet_core::types::parse_timestamp;
use fleet_core::{AuditFilter, AuditResult, ConfigError, StoredAuditEvent};
use fleet_hub::{paginate, ExportFormat, Page};

#[derive(Subcommand, Debug)]
pub enum AuditCommand {
    /// List matching events, newest first.
    List(ListArgs),
    /// Write every matching event as CSV or JSON.
    Export(ExportArgs),
}

#[derive(Args, Debug)]
pub struct FilterArgs {
    /// Audit database. Defaults to the registered agent's database.
    #[arg(long)]
    pub db: Option<PathBuf>,

    #[arg(long)]
    pub actor: Option<String>,

    #[arg(long)]
    pub action: Option<String>,

    /// Substring match on the target.
    #[arg(long)]
    pub target: Option<String>,

    /// `success` or `failure`.
    #[arg(long, value_parser = parse_result)]
    pub result: Option<AuditResult>,

    /// RFC 3339 timestamp or `YYYY-MM-DD`.
    #[arg(long, value_parser = parse_time)]
    pub since: Option<DateTime<Utc>>,

    /// RFC 3339 timestamp or `YYYY-MM-DD`.
    #[arg(long, value_parser = parse_time)]
    pub until: Option<DateTime<Utc>>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    #[arg(long, default_value_t = 1)]
    pub page: u32,

    #[arg(long, default_value_t = fleet_hub::audit_merge::DEFAULT_PER_PAGE)]
    pub per_page: u32,

    /// Emit the page as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// `csv` or `json`.
    #[arg(long, default_value = "csv")]
    pub format: String,

    /// Write to this file instead of stdout.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

#[derive(Tabled)]
struct AuditRow {
    time: String,
    host: String,
    actor: String,
    action: String,
    target: String,
    result: String,
    #[tabled(rename = "ms")]
    duration_ms: String,
}

pub fn run(command: AuditCommand) -> Result<()> {
    match command {
        AuditCommand::List(args) => list(args),
        AuditCommand::Export(args) => export(args),
    }
}

fn list(args: ListArgs) -> Result<()> {
    let page = Page::new(args.page, args.per_page)?;
    let events = query(&args.filter)?;
    let page = paginate(events, page);

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&page).context("failed to serialize audit page")?
        );
        return Ok(());
    }
    if page.items.is_empty() {
        println!("No audit events ({} total).", page.total);
        return Ok(());
    }

    let rows: Vec<AuditRow> = page
        .items
        .into_iter()
        .map(|row| {
            let e = row.event;
            AuditRow {
                time: e.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                host: e.host_id.to_string(),
                actor: e.actor,
                action: e.action,
                target: e.target,
                result: e.result.to_string(),
                duration_ms: e.duration_ms.map(|ms| ms.to_string()).unwrap_or_default(),
            }
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    let last_page = page.total.div_ceil(page.per_page as usize).max(1);
    println!("page {} of {last_page} ({} events)", page.page, page.total);
    Ok(())
}

fn export(args: ExportArgs) -> Result<()> {
    let format = ExportFormat::parse(&args.format)?;
    let events = query(&args.filter)?;
    let bytes = format.render(&events)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, &bytes)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("wrote {} events to {}", events.len(), path.display());
        }
        None => {
            use std::io::Write;
            std::io::stdout()
                .write_all(&bytes)
                .context("failed to write export to stdout")?;
        }
    }
    Ok(())
}

fn query(args: &FilterArgs) -> Result<Vec<StoredAuditEvent>> {
    let db = resolve_db(args.db.as_deref())?;
    let Some(log) = LocalAuditLog::open_existing(&db)
        .with_context(|| format!("failed to open audit database {}", db.display()))?
    else {
        tracing::info!("no audit database at {}", db.display());
        return Ok(Vec::new());
    };
    let filter = AuditFilter {
        actor: args.actor.clone(),
        action: args.action.clone(),
        target: args.target.clone(),
        result: args.result,
        since: args.since,
        until: args.until,
    };
    Ok(log.query(&filter)?)
}

/// `--db`, else the registered agent's database, else the default path.
fn resolve_db(flag: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path.to_path_buf());
    }
    match config::load_agent() {
        Ok(cfg) => Ok(cfg.audit_db_path),
        Err(ConfigError::NotRegistered { .. }) => Ok(PathBuf::from(DEFAULT_AUDIT_DB)),
        Err(err) => Err(err).context("failed to load agent config"),
    }
}

fn parse_result(raw: &str) -> Result<AuditResult, String> {
    match raw.to_ascii_lowercase().as_str() {
        "success" => Ok(AuditResult::Success),
        "failure" => Ok(AuditResult::Failure),
        other => Err(format!("unknown result '{other}'; expected success or failure")),
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Some(ts) = parse_timestamp(raw) {
        return Ok(ts);
    }
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid time '{raw}'; expected RFC 3339 or YYYY-MM-DD"))
}
