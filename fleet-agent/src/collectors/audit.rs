use std::path::Path;

use fleet_core::StoredAuditEvent;

use crate::audit_log::LocalAuditLog;
use crate::error::SyncError;

/// Most rows sent in one audit step. The remainder goes next cycle.
pub const AUDIT_BATCH_LIMIT: usize = 500;

/// Rows with `id > last_id` and the highest id scanned.
///
/// Unreadable rows are left out of the batch but covered by the returned id,
/// so one bad row cannot hold the cursor back. A missing database (or one
/// without the audit table) yields `([], last_id)`. The caller advances its
/// cursor only after the batch was delivered.
pub fn collect_unsent_audit_events(
    db_path: &Path,
    last_id: i64,
) -> Result<(Vec<StoredAuditEvent>, i64), SyncError> {
    let Some(log) = LocalAuditLog::open_existing(db_path)? else {
        return Ok((Vec::new(), last_id));
    };
    log.events_after(last_id, AUDIT_BATCH_LIMIT)
}

/// Highest local row id; 0 when the database or table is absent.
pub fn local_max_id(db_path: &Path) -> Result<i64, SyncError> {
    match LocalAuditLog::open_existing(db_path)? {
        Some(log) => log.max_id(),
        None => Ok(0),
    }
}
