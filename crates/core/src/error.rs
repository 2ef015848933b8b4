// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error kinds shared across the job orchestration subsystem (spec §7).

use thiserror::Error;

/// Error kinds surfaced by the core. Not every variant applies to every
/// component; see spec §7 for the full propagation policy.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found")]
    NotFound,

    #[error("queue is full: {pending_plus_active} active tasks exceeds cap {cap}")]
    QueueFull { pending_plus_active: usize, cap: usize },

    #[error("authentication required")]
    AuthRequired,

    #[error("invalid authentication token")]
    AuthInvalid,

    #[error("worker is busy")]
    WorkerBusy,

    #[error("task timed out")]
    Timeout,

    #[error("task failed: {0}")]
    TaskFailed(String),

    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("shutting down")]
    ShuttingDown,
}
