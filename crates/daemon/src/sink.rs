// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Breaks the construction-order half of the Dispatcher <-> Hub cycle (spec
//! §9 Design Notes): the Worker Hub and Federation Handler need a
//! `TaskEventsSink` at construction time, but the only real sink (the
//! Dispatcher) needs both of them already built as `TransportSender`s.
//!
//! [`LazySink`] is a `TaskEventsSink` that forwards every call to whatever
//! was installed by [`LazySink::install`]. It is only ever empty between
//! its own construction and the dispatcher's, well before either listener
//! is bound, so no real event should arrive while it is empty; if one
//! somehow did, it is dropped with a warning rather than panicking.

use async_trait::async_trait;
use memhub_core::{Capability, Destination, HubId, TaskEventsSink, TaskId, WorkerId};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

#[derive(Default)]
pub struct LazySink {
    inner: OnceLock<Arc<dyn TaskEventsSink>>,
}

impl LazySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the real sink. The composition root calls this exactly once,
    /// right after constructing the dispatcher and before binding any
    /// listener; a second call is a no-op.
    pub fn install(&self, sink: Arc<dyn TaskEventsSink>) {
        if self.inner.set(sink).is_err() {
            tracing::error!("LazySink::install called more than once");
        }
    }
}

#[async_trait]
impl TaskEventsSink for LazySink {
    async fn on_worker_connected(&self, worker_id: WorkerId, capabilities: HashSet<Capability>) {
        match self.inner.get() {
            Some(sink) => sink.on_worker_connected(worker_id, capabilities).await,
            None => tracing::warn!(%worker_id, "LazySink: worker connected before dispatcher was wired"),
        }
    }

    async fn on_worker_disconnected(&self, worker_id: WorkerId) {
        match self.inner.get() {
            Some(sink) => sink.on_worker_disconnected(worker_id).await,
            None => tracing::warn!(%worker_id, "LazySink: worker disconnected before dispatcher was wired"),
        }
    }

    async fn on_hub_disconnected(&self, hub_id: HubId) {
        match self.inner.get() {
            Some(sink) => sink.on_hub_disconnected(hub_id).await,
            None => tracing::warn!(%hub_id, "LazySink: hub disconnected before dispatcher was wired"),
        }
    }

    async fn on_task_complete(&self, destination: Destination, task_id: TaskId, result: serde_json::Value, processing_time_ms: u64) {
        match self.inner.get() {
            Some(sink) => sink.on_task_complete(destination, task_id, result, processing_time_ms).await,
            None => tracing::warn!(%task_id, "LazySink: task completed before dispatcher was wired"),
        }
    }

    async fn on_task_error(&self, destination: Destination, task_id: TaskId, error: String, retryable: bool) {
        match self.inner.get() {
            Some(sink) => sink.on_task_error(destination, task_id, error, retryable).await,
            None => tracing::warn!(%task_id, "LazySink: task errored before dispatcher was wired"),
        }
    }

    async fn on_task_progress(&self, destination: Destination, task_id: TaskId, progress: f64, message: Option<String>) {
        if let Some(sink) = self.inner.get() {
            sink.on_task_progress(destination, task_id, progress, message).await;
        }
    }
}
