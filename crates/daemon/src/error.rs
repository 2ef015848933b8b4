// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Errors surfaced by daemon startup and shutdown (spec §7, composition root).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine state directory")]
    NoStateDir,

    #[error("failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("failed to bind {0}: {1}")]
    BindFailed(String, std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] memhub_storage::StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
