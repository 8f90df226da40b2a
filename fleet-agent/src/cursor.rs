//! Sync cursor: durable progress tracking for incremental collectors.
//!
//! Persists a `SyncCursor` JSON document at
//! `<home>/.fleet/agent/sync_state.json`.
//! Writes use the same atomic `.tmp` + rename pattern as the agent config.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, SyncError};

/// Progress of the two incremental collectors.
///
/// Values only move forward. The single legal decrease is an audit-store
/// reset, which must be detected via [`SyncCursor::detect_audit_reset`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    #[serde(alias = "last_audit_id", default)]
    pub last_audit_row_id: i64,
    /// Byte offset per traffic log file name.
    #[serde(default)]
    pub file_offsets: BTreeMap<String, u64>,
}

impl SyncCursor {
    /// Move the audit cursor to `new_max`. Returns `false` (and leaves the
    /// cursor untouched) when that would move it backwards.
    pub fn advance_audit(&mut self, new_max: i64) -> bool {
        if new_max < self.last_audit_row_id {
            return false;
        }
        self.last_audit_row_id = new_max;
        true
    }

    /// `true` when the local store holds fewer rows than the cursor claims
    /// were sent, i.e. the store was wiped or recreated.
    pub fn detect_audit_reset(&self, max_local_id: i64) -> bool {
        max_local_id < self.last_audit_row_id
    }

    pub fn reset_audit(&mut self) {
        self.last_audit_row_id = 0;
    }
}

/// Where the orchestrator keeps its cursor between runs.
pub trait CursorStore {
    fn load(&self) -> Result<SyncCursor, SyncError>;
    fn save(&self, cursor: &SyncCursor) -> Result<(), SyncError>;
}

impl<T: CursorStore + ?Sized> CursorStore for &T {
    fn load(&self) -> Result<SyncCursor, SyncError> {
        (**self).load()
    }

    fn save(&self, cursor: &SyncCursor) -> Result<(), SyncError> {
        (**self).save(cursor)
    }
}

/// Path to the sync state JSON, rooted at `home`.
///
/// `~/.fleet/agent/sync_state.json`
pub fn state_path_at(home: &Path) -> PathBuf {
    home.join(".fleet").join("agent").join("sync_state.json")
}

/// JSON file store.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default location under `home`.
    pub fn at_home(home: &Path) -> Self {
        Self::new(state_path_at(home))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CursorStore for FileCursorStore {
    /// Returns the default cursor if the file does not exist yet, or if it
    /// cannot be parsed (logged; append-only rows may be replayed).
    fn load(&self) -> Result<SyncCursor, SyncError> {
        if !self.path.exists() {
            return Ok(SyncCursor::default());
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| io_err(&self.path, e))?;
        match serde_json::from_str::<SyncCursor>(&contents) {
            Ok(cursor) => Ok(cursor),
            Err(e) => {
                tracing::warn!(
                    "sync state at {} is corrupt ({e}); starting from an empty cursor",
                    self.path.display()
                );
                Ok(SyncCursor::default())
            }
        }
    }

    /// Writes to `<path>.tmp` then renames to `<path>`.
    fn save(&self, cursor: &SyncCursor) -> Result<(), SyncError> {
        let Some(dir) = self.path.parent() else {
            return Err(io_err(
                &self.path,
                std::io::Error::other("invalid sync state path"),
            ));
        };
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let json = serde_json::to_string_pretty(cursor)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }
}

/// Process-local store, used by dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursor: RefCell<SyncCursor>,
    saves: RefCell<usize>,
}

impl MemoryCursorStore {
    pub fn new(cursor: SyncCursor) -> Self {
        Self {
            cursor: RefCell::new(cursor),
            saves: RefCell::new(0),
        }
    }

    pub fn snapshot(&self) -> SyncCursor {
        self.cursor.borrow().clone()
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> usize {
        *self.saves.borrow()
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self) -> Result<SyncCursor, SyncError> {
        Ok(self.snapshot())
    }

    fn save(&self, cursor: &SyncCursor) -> Result<(), SyncError> {
        *self.cursor.borrow_mut() = cursor.clone();
        *self.saves.borrow_mut() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_cursor_when_file_missing() {
        let tmp = TempDir::new().unwrap();
        let store = FileCursorStore::at_home(tmp.path());
        assert_eq!(store.load().unwrap(), SyncCursor::default());
    }

    #[test]
    fn roundtrip_save_load() {
        let tmp = TempDir::new().unwrap();
        let store = FileCursorStore::at_home(tmp.path());
        let mut cursor = SyncCursor {
            last_audit_row_id: 42,
            ..Default::default()
        };
        cursor
            .file_offsets
            .insert("example.com.access.json".into(), 250);

        store.save(&cursor).unwrap();
        assert_eq!(store.load().unwrap(), cursor);
    }

    #[test]
    fn tmp_file_cleaned_up_after_save() {
        let tmp = TempDir::new().unwrap();
        let store = FileCursorStore::at_home(tmp.path());
        store.save(&SyncCursor::default()).unwrap();
        let tmp_path = store.path().with_extension("json.tmp");
        assert!(
            !tmp_path.exists(),
            "tmp file should be removed after atomic rename"
        );
    }

    #[test]
    fn corrupt_file_resets_to_default() {
        let tmp = TempDir::new().unwrap();
        let store = FileCursorStore::at_home(tmp.path());
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "{not json").unwrap();

        assert_eq!(store.load().unwrap(), SyncCursor::default());
    }

    #[test]
    fn legacy_field_name_is_accepted() {
        let tmp = TempDir::new().unwrap();
        let store = FileCursorStore::at_home(tmp.path());
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            r#"{"last_audit_id": 9, "file_offsets": {"a.access.json": 10}}"#,
        )
        .unwrap();

        let cursor = store.load().unwrap();
        assert_eq!(cursor.last_audit_row_id, 9);
        assert_eq!(cursor.file_offsets.get("a.access.json"), Some(&10));
    }

    #[test]
    fn advance_audit_never_moves_backwards() {
        let mut cursor = SyncCursor {
            last_audit_row_id: 5,
            ..Default::default()
        };
        assert!(!cursor.advance_audit(3));
        assert_eq!(cursor.last_audit_row_id, 5);
        assert!(cursor.advance_audit(8));
        assert_eq!(cursor.last_audit_row_id, 8);
    }

    #[test]
    fn reset_detected_when_store_shrinks() {
        let cursor = SyncCursor {
            last_audit_row_id: 5,
            ..Default::default()
        };
        assert!(cursor.detect_audit_reset(0));
        assert!(!cursor.detect_audit_reset(5));
        assert!(!cursor.detect_audit_reset(7));
    }

    #[test]
    fn memory_store_counts_saves() {
        let store = MemoryCursorStore::default();
        let cursor = SyncCursor {
            last_audit_row_id: 1,
            ..Default::default()
        };
        store.save(&cursor).unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.load().unwrap(), cursor);
    }
}
