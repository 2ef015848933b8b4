// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed errors surfaced by this crate's public contracts (spec §7).

use crate::snapshot::SnapshotError;
use crate::wal::WalError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("wal error: {0}")]
    Wal(#[from] WalError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}
