//! Local durable audit log.
//!
//! Every event is written twice: one JSON line appended to `audit.jsonl`
//! and one row in the `audit_logs` SQLite table. The table's
//! `AUTOINCREMENT` id is the cursor the audit collector syncs by.
//!
//! The row mapping and filter SQL are shared with the hub, which keeps the
//! same table layout for agent-synced events.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde_json::Value;

use fleet_core::types::{format_timestamp, parse_timestamp};
use fleet_core::{AuditEvent, AuditFilter, AuditResult, HostId, StoredAuditEvent};

use crate::error::{io_err, SyncError};

/// Table layout shared by the agent's local log and the hub aggregate.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    vps_id TEXT NOT NULL,
    actor TEXT NOT NULL,
    action TEXT NOT NULL,
    target TEXT NOT NULL DEFAULT '',
    params TEXT NOT NULL DEFAULT '{}',
    result TEXT NOT NULL DEFAULT 'success',
    error TEXT,
    duration_ms INTEGER
);
CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_logs(timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_logs(action);
CREATE INDEX IF NOT EXISTS idx_audit_actor ON audit_logs(actor);
"#;

const COLUMNS: &str =
    "id, timestamp, vps_id, actor, action, target, params, result, error, duration_ms";

pub const ENV_ACTOR: &str = "FLEET_ACTOR";

// -----------------------------------------------------------------------------
// 1. Shared row helpers
// -----------------------------------------------------------------------------

/// Insert `event` into an `audit_logs` table and return its row id.
pub fn insert_event(conn: &Connection, event: &AuditEvent) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO audit_logs
         (timestamp, vps_id, actor, action, target, params, result, error, duration_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            format_timestamp(event.timestamp),
            event.host_id.as_str(),
            event.actor,
            event.action,
            event.target,
            event.params.to_string(),
            event.result.as_str(),
            event.error,
            event.duration_ms.map(|ms| ms.min(i64::MAX as u64) as i64),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Map a row selected with [`COLUMNS`] order.
pub fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<StoredAuditEvent> {
    let timestamp: String = row.get(1)?;
    let params: String = row.get(6)?;
    let result: String = row.get(7)?;
    let duration_ms: Option<i64> = row.get(9)?;
    Ok(StoredAuditEvent {
        id: row.get(0)?,
        event: AuditEvent {
            timestamp: parse_stored_timestamp(&timestamp)?,
            host_id: HostId(row.get(2)?),
            actor: row.get(3)?,
            action: row.get(4)?,
            target: row.get(5)?,
            params: serde_json::from_str(&params)
                .unwrap_or_else(|_| Value::Object(Default::default())),
            result: AuditResult::parse_lenient(&result),
            error: row.get(8)?,
            duration_ms: duration_ms.and_then(|ms| u64::try_from(ms).ok()),
        },
    })
}

/// Row id plus the mapped event, or `None` when the row's values cannot
/// be converted. Such rows are logged and skipped.
fn read_row(row: &rusqlite::Row) -> rusqlite::Result<(i64, Option<StoredAuditEvent>)> {
    let id: i64 = row.get(0)?;
    match row_to_event(row) {
        Ok(event) => Ok((id, Some(event))),
        Err(
            err @ (rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)),
        ) => {
            tracing::warn!("skipping unreadable audit row {id}: {err}");
            Ok((id, None))
        }
        Err(err) => Err(err),
    }
}

/// RFC 3339, or a zone-less `YYYY-MM-DD[ T]HH:MM:SS[.f]` taken as UTC.
fn parse_stored_timestamp(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    if let Some(ts) = parse_timestamp(value) {
        return Ok(ts);
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value.trim(), fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                format!("invalid timestamp '{value}' in column 'timestamp'").into(),
            )
        })
}

/// `WHERE` clause and bound values for the column filters of `filter`.
/// Empty clause when none is set.
///
/// The time bounds are not part of the clause: stored timestamps may be in
/// more than one text format, so they are compared after parsing.
pub fn filter_clause(filter: &AuditFilter) -> (String, Vec<String>) {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<String> = Vec::new();

    if let Some(actor) = filter.actor.as_deref().filter(|s| !s.is_empty()) {
        clauses.push("actor = ?");
        values.push(actor.to_string());
    }
    if let Some(action) = filter.action.as_deref().filter(|s| !s.is_empty()) {
        clauses.push("action = ?");
        values.push(action.to_string());
    }
    if let Some(target) = filter.target.as_deref().filter(|s| !s.is_empty()) {
        clauses.push("instr(target, ?) > 0");
        values.push(target.to_string());
    }
    if let Some(result) = filter.result {
        clauses.push("result = ?");
        values.push(result.as_str().to_string());
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

/// All readable rows matching `filter`, newest first (ties by id).
pub fn query_events(
    conn: &Connection,
    filter: &AuditFilter,
) -> rusqlite::Result<Vec<StoredAuditEvent>> {
    let (clause, values) = filter_clause(filter);
    let sql = format!("SELECT {COLUMNS} FROM audit_logs{clause}");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(values.iter()), read_row)?
        .collect::<Result<Vec<_>, _>>()?;
    let mut events: Vec<StoredAuditEvent> = rows
        .into_iter()
        .filter_map(|(_, event)| event)
        .filter(|stored| filter.matches(&stored.event))
        .collect();
    events.sort_by(|a, b| {
        b.event
            .timestamp
            .cmp(&a.event.timestamp)
            .then(b.id.cmp(&a.id))
    });
    Ok(events)
}

// -----------------------------------------------------------------------------
// 2. LocalAuditLog
// -----------------------------------------------------------------------------

/// Handle on the host's audit database (plus optional JSONL mirror).
pub struct LocalAuditLog {
    conn: Connection,
    jsonl_path: Option<PathBuf>,
}

impl LocalAuditLog {
    /// Open (creating if needed) the database at `db_path`. When
    /// `jsonl_path` is given every recorded event is mirrored there.
    pub fn open(db_path: &Path, jsonl_path: Option<&Path>) -> Result<Self, SyncError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            jsonl_path: jsonl_path.map(Path::to_path_buf),
        })
    }

    pub fn open_in_memory() -> Result<Self, SyncError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            jsonl_path: None,
        })
    }

    /// Open an existing database without creating or migrating it.
    ///
    /// `Ok(None)` when the file or the `audit_logs` table does not exist.
    pub fn open_existing(db_path: &Path) -> Result<Option<Self>, SyncError> {
        if !db_path.exists() {
            return Ok(None);
        }
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let table: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'audit_logs'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if table.is_none() {
            return Ok(None);
        }
        Ok(Some(Self {
            conn,
            jsonl_path: None,
        }))
    }

    /// Append `event` to the JSONL mirror (if any) and the table. Returns
    /// the new row id.
    pub fn record(&self, event: &AuditEvent) -> Result<i64, SyncError> {
        if let Some(path) = &self.jsonl_path {
            append_jsonl(path, event)?;
        }
        Ok(insert_event(&self.conn, event)?)
    }

    /// Rows with `id > last_id`, ascending, at most `limit` scanned, and
    /// the highest id scanned (`last_id` when none).
    ///
    /// Unreadable rows are skipped but still count towards the returned id,
    /// so a cursor built on it moves past them.
    pub fn events_after(
        &self,
        last_id: i64,
        limit: usize,
    ) -> Result<(Vec<StoredAuditEvent>, i64), SyncError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM audit_logs WHERE id > ?1 ORDER BY id LIMIT ?2"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![last_id, limit], read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        let scanned = rows.iter().map(|(id, _)| *id).fold(last_id, i64::max);
        let events = rows.into_iter().filter_map(|(_, event)| event).collect();
        Ok((events, scanned))
    }

    /// Highest row id, or 0 for an empty table.
    pub fn max_id(&self) -> Result<i64, SyncError> {
        let max: Option<i64> = self
            .conn
            .query_row("SELECT MAX(id) FROM audit_logs", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0))
    }

    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<StoredAuditEvent>, SyncError> {
        Ok(query_events(&self.conn, filter)?)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn append_jsonl(path: &Path, event: &AuditEvent) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err(path, e))?;
    file.write_all(line.as_bytes()).map_err(|e| io_err(path, e))
}

// -----------------------------------------------------------------------------
// 3. Scoped capture
// -----------------------------------------------------------------------------

/// Who is performing audited operations: `FLEET_ACTOR`, else `USER`, else
/// `"unknown"`.
pub fn resolve_actor() -> String {
    resolve_actor_with(|key| std::env::var(key).ok())
}

pub(crate) fn resolve_actor_with<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(ENV_ACTOR)
        .filter(|v| !v.is_empty())
        .or_else(|| lookup("USER").filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Run `op` and record exactly one audit event for it, whichever way it
/// exits.
///
/// `op` may annotate the event (target, params) before returning. The
/// event's result, error, and duration are filled in afterwards. A failure
/// to record is logged and never replaces `op`'s own result.
pub fn audited<T, E, F>(
    log: &LocalAuditLog,
    host_id: &HostId,
    action: &str,
    target: &str,
    params: Value,
    op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnOnce(&mut AuditEvent) -> Result<T, E>,
{
    let mut event = AuditEvent::new(host_id.clone(), resolve_actor(), action);
    event.target = target.to_string();
    event.params = params;

    let started = Instant::now();
    let outcome = op(&mut event);
    event.duration_ms = Some(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));
    match &outcome {
        Ok(_) => event.result = AuditResult::Success,
        Err(e) => {
            event.result = AuditResult::Failure;
            event.error = Some(e.to_string());
        }
    }

    if let Err(e) = log.record(&event) {
        tracing::error!("failed to record audit event {action}: {e}");
    }
    outcome
}
