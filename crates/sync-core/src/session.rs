//! Per-store browser storage-state cache.
//!
//! Session state is never cross-used between stores: every operation here
//! is keyed by `store_code` and touches only that store's file. Writes go
//! through a write-to-temp-then-rename so a crash mid-write never leaves a
//! corrupt state file behind.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sync_types::SyncError;

/// Opaque browser storage state (cookies, localStorage) as captured by the
/// web automation adapter. Kept as a raw JSON value here; only the adapter
/// needs to interpret its shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageState(pub serde_json::Value);

/// Outcome of probing a stored session against the live site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Valid,
    Expired,
    Unknown,
}

fn state_path(dir: &Path, store_code: &str) -> PathBuf {
    dir.join(format!("{store_code}_storage_state.json"))
}

/// Load the cached state for `store_code`, or `None` if never saved.
pub fn load_state(dir: &Path, store_code: &str) -> Result<Option<StorageState>, SyncError> {
    let path = state_path(dir, store_code);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(|e| {
        SyncError::with_source(
            sync_types::SyncErrorKind::Transport,
            format!("failed to read session state for {store_code}"),
            e,
        )
    })?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| SyncError::parse(format!("corrupt session state for {store_code}: {e}")))?;
    Ok(Some(StorageState(value)))
}

/// Atomically persist `state` for `store_code`: write to a sibling temp
/// file, then rename over the destination.
pub fn save_state(dir: &Path, store_code: &str, state: &StorageState) -> Result<(), SyncError> {
    std::fs::create_dir_all(dir).map_err(|e| {
        SyncError::with_source(
            sync_types::SyncErrorKind::Transport,
            "failed to create session directory",
            e,
        )
    })?;
    let path = state_path(dir, store_code);
    let tmp_path = dir.join(format!("{store_code}_storage_state.json.tmp"));

    let serialized = serde_json::to_vec_pretty(&state.0)
        .map_err(|e| SyncError::parse(format!("failed to serialize session state: {e}")))?;
    std::fs::write(&tmp_path, serialized).map_err(|e| {
        SyncError::with_source(
            sync_types::SyncErrorKind::Transport,
            "failed to write session state temp file",
            e,
        )
    })?;
    std::fs::rename(&tmp_path, &path).map_err(|e| {
        SyncError::with_source(
            sync_types::SyncErrorKind::Transport,
            "failed to rename session state into place",
            e,
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_state_of_unseen_store_is_none() {
        let td = tempdir().unwrap();
        assert!(load_state(td.path(), "A668").unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let td = tempdir().unwrap();
        let state = StorageState(serde_json::json!({"cookies": ["a", "b"]}));
        save_state(td.path(), "A668", &state).unwrap();
        let loaded = load_state(td.path(), "A668").unwrap().unwrap();
        assert_eq!(loaded.0, state.0);
    }

    #[test]
    fn state_is_scoped_per_store() {
        let td = tempdir().unwrap();
        save_state(td.path(), "A668", &StorageState(serde_json::json!({"x": 1}))).unwrap();
        assert!(load_state(td.path(), "B001").unwrap().is_none());
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let td = tempdir().unwrap();
        save_state(td.path(), "A668", &StorageState(serde_json::json!({}))).unwrap();
        assert!(!td.path().join("A668_storage_state.json.tmp").exists());
        assert!(td.path().join("A668_storage_state.json").exists());
    }
}
