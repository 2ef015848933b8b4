// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! memhub-storage: WAL-backed TaskQueue Repository and Hub Registry (spec §4.1, §4.5).

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod error;
mod filter;
mod repository;
mod snapshot;
mod state;
mod wal;

pub use error::StorageError;
pub use filter::{Paging, TaskFilter};
pub use repository::{HubRegistry, StatusPatch, TaskRepository, WalHubRegistry, WalTaskRepository};
pub use state::MaterializedState;
pub use wal::{Wal, WalEntry, WalError};
pub use snapshot::SnapshotError;
