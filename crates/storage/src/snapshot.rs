// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Zstd-compressed periodic snapshots of [`MaterializedState`].
//!
//! A snapshot records the WAL sequence number it was taken at so replay on
//! restart can skip everything already folded in.

use crate::state::MaterializedState;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },

    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] std::io::Error),

    #[error("failed to decode snapshot: {0}")]
    Decode(#[source] std::io::Error),

    #[error("snapshot body is not valid JSON: {0}")]
    Deserialize(#[source] serde_json::Error),
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct SnapshotEnvelope {
    processed_seq: u64,
    state: MaterializedState,
}

/// Write `state` to `path` as a zstd-compressed JSON blob, atomically via a
/// temp-file-then-rename so a crash mid-write never corrupts the prior
/// snapshot.
pub fn save(path: impl AsRef<Path>, processed_seq: u64, state: &MaterializedState) -> Result<(), SnapshotError> {
    let path = path.as_ref();
    let envelope = SnapshotEnvelope { processed_seq, state: state.clone() };
    let json = serde_json::to_vec(&envelope).map_err(SnapshotError::Deserialize)?;
    let compressed = zstd::encode_all(json.as_slice(), ZSTD_LEVEL).map_err(SnapshotError::Encode)?;

    let tmp_path = path.with_extension("tmp");
    {
        let mut tmp = fs::File::create(&tmp_path).map_err(|source| SnapshotError::Io { path: tmp_path.clone(), source })?;
        tmp.write_all(&compressed).map_err(|source| SnapshotError::Io { path: tmp_path.clone(), source })?;
        tmp.flush().map_err(|source| SnapshotError::Io { path: tmp_path.clone(), source })?;
    }
    fs::rename(&tmp_path, path).map_err(|source| SnapshotError::Io { path: path.to_path_buf(), source })?;

    Ok(())
}

/// Load a snapshot previously written by [`save`]. Returns `None` if no
/// snapshot file exists yet (fresh install).
pub fn load(path: impl AsRef<Path>) -> Result<Option<(u64, MaterializedState)>, SnapshotError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let compressed = fs::read(path).map_err(|source| SnapshotError::Io { path: path.to_path_buf(), source })?;
    let json = zstd::decode_all(compressed.as_slice()).map_err(SnapshotError::Decode)?;
    let envelope: SnapshotEnvelope = serde_json::from_slice(&json).map_err(SnapshotError::Deserialize)?;
    Ok(Some((envelope.processed_seq, envelope.state)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use memhub_core::{Task, TaskConfig, TaskId, TaskType};
    use tempfile::tempdir;

    #[test]
    fn load_on_missing_file_returns_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.snapshot.zst");
        assert!(load(&path).unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.snapshot.zst");

        let mut state = MaterializedState::default();
        let config = TaskConfig::builder(TaskType::Observation, memhub_core::Capability::new("observation", "mistral")).dedup_seed("seed").build();
        let task = Task::new(TaskId::new(), config, 1000);
        state.tasks.insert(task.id, task);

        save(&path, 42, &state).unwrap();
        let (seq, loaded) = load(&path).unwrap().unwrap();

        assert_eq!(seq, 42);
        assert_eq!(loaded.tasks.len(), 1);
    }

    #[test]
    fn save_overwrites_prior_snapshot_atomically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.snapshot.zst");

        save(&path, 1, &MaterializedState::default()).unwrap();
        save(&path, 2, &MaterializedState::default()).unwrap();

        let (seq, _) = load(&path).unwrap().unwrap();
        assert_eq!(seq, 2);
        assert!(!path.with_extension("tmp").exists());
    }
}
