//! Unified audit view over the local durable log and agent-synced rows.
//!
//! Both sources are queried with the same [`AuditFilter`]. Rows are merged
//! (local first), deduplicated, sorted newest first, and only then paged or
//! exported.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use fleet_core::types::format_timestamp;
use fleet_core::StoredAuditEvent;

use crate::error::HubError;

pub use fleet_core::AuditFilter;

pub const DEFAULT_PER_PAGE: u32 = 50;
pub const MAX_PER_PAGE: u32 = 200;

const CSV_HEADER: [&str; 8] = [
    "timestamp",
    "vps_id",
    "actor",
    "action",
    "target",
    "result",
    "error",
    "duration_ms",
];

/// Merge `local` and `remote`, dropping later duplicates of
/// `(timestamp, actor, action, target)`, newest first.
///
/// The sort is stable, so among equal timestamps local rows stay ahead of
/// remote ones.
pub fn merge_events(
    local: Vec<StoredAuditEvent>,
    remote: Vec<StoredAuditEvent>,
) -> Vec<StoredAuditEvent> {
    let mut seen: HashSet<(DateTime<Utc>, String, String, String)> = HashSet::new();
    let mut merged: Vec<StoredAuditEvent> = local
        .into_iter()
        .chain(remote)
        .filter(|row| {
            let e = &row.event;
            seen.insert((e.timestamp, e.actor.clone(), e.action.clone(), e.target.clone()))
        })
        .collect();
    merged.sort_by(|a, b| b.event.timestamp.cmp(&a.event.timestamp));
    merged
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// A validated page request: `page >= 1`, `1 <= per_page <= 200`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    page: u32,
    per_page: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl Page {
    pub fn new(page: u32, per_page: u32) -> Result<Self, HubError> {
        if page < 1 {
            return Err(HubError::BadRequest("page must be >= 1".to_string()));
        }
        if !(1..=MAX_PER_PAGE).contains(&per_page) {
            return Err(HubError::BadRequest(format!(
                "per_page must be between 1 and {MAX_PER_PAGE}"
            )));
        }
        Ok(Self { page, per_page })
    }

    /// Missing values take the defaults.
    pub fn from_query(page: Option<u32>, per_page: Option<u32>) -> Result<Self, HubError> {
        Self::new(page.unwrap_or(1), per_page.unwrap_or(DEFAULT_PER_PAGE))
    }

    pub fn page(self) -> u32 {
        self.page
    }

    pub fn per_page(self) -> u32 {
        self.per_page
    }

    fn offset(self) -> usize {
        (self.page as usize - 1).saturating_mul(self.per_page as usize)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditPage {
    pub total: usize,
    pub page: u32,
    pub per_page: u32,
    pub items: Vec<StoredAuditEvent>,
}

/// Slice the merged set. A page past the end is empty, `total` unchanged.
pub fn paginate(merged: Vec<StoredAuditEvent>, page: Page) -> AuditPage {
    let total = merged.len();
    let items = merged
        .into_iter()
        .skip(page.offset())
        .take(page.per_page as usize)
        .collect();
    AuditPage {
        total,
        page: page.page,
        per_page: page.per_page,
        items,
    }
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn parse(raw: &str) -> Result<Self, HubError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(HubError::BadRequest(format!(
                "unsupported export format '{other}' (expected csv or json)"
            ))),
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            ExportFormat::Csv => "audit_logs.csv",
            ExportFormat::Json => "audit_logs.json",
        }
    }

    pub fn render(self, rows: &[StoredAuditEvent]) -> Result<Vec<u8>, HubError> {
        match self {
            ExportFormat::Csv => export_csv(rows),
            ExportFormat::Json => export_json(rows),
        }
    }
}

pub fn export_csv(rows: &[StoredAuditEvent]) -> Result<Vec<u8>, HubError> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer
        .write_record(CSV_HEADER)
        .map_err(|e| HubError::Export(e.to_string()))?;
    for row in rows {
        let e = &row.event;
        let duration = e.duration_ms.map(|ms| ms.to_string()).unwrap_or_default();
        writer
            .write_record([
                format_timestamp(e.timestamp).as_str(),
                e.host_id.as_str(),
                e.actor.as_str(),
                e.action.as_str(),
                e.target.as_str(),
                e.result.as_str(),
                e.error.as_deref().unwrap_or(""),
                duration.as_str(),
            ])
            .map_err(|e| HubError::Export(e.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| HubError::Export(e.to_string()))
}

pub fn export_json(rows: &[StoredAuditEvent]) -> Result<Vec<u8>, HubError> {
    Ok(serde_json::to_vec_pretty(rows)?)
}
