// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test helpers shared across crates (gated behind `test-support`).

use crate::capability::Capability;
use crate::ports::TaskEventsSink;
use crate::task::{Task, TaskConfig, TaskId, TaskType};
use crate::worker::WorkerId;
use async_trait::async_trait;
use std::collections::HashSet;

/// Build a task with sane defaults for tests, overriding only what a test
/// cares about.
pub fn sample_task(task_type: TaskType, required: &str, created_at_epoch_ms: u64) -> Task {
    let config = TaskConfig::builder(task_type, Capability::from(required)).dedup_seed(format!("{task_type}:{required}")).build();
    Task::new(TaskId::new(), config, created_at_epoch_ms)
}

/// A [`TaskEventsSink`] that discards every callback, for tests of the Hub
/// and Federation Handler that don't exercise the Dispatcher.
#[derive(Debug, Default)]
pub struct NullTaskEventsSink;

#[async_trait]
impl TaskEventsSink for NullTaskEventsSink {
    async fn on_worker_connected(&self, _worker_id: WorkerId, _capabilities: HashSet<Capability>) {}
    async fn on_worker_disconnected(&self, _worker_id: WorkerId) {}
    async fn on_hub_disconnected(&self, _hub_id: crate::hub::HubId) {}
    async fn on_task_complete(&self, _destination: crate::ports::Destination, _task_id: TaskId, _result: serde_json::Value, _processing_time_ms: u64) {}
    async fn on_task_error(&self, _destination: crate::ports::Destination, _task_id: TaskId, _error: String, _retryable: bool) {}
    async fn on_task_progress(&self, _destination: crate::ports::Destination, _task_id: TaskId, _progress: f64, _message: Option<String>) {}
}
