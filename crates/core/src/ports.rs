// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seam traits that break the Dispatcher <-> Hub callback cycle (spec §9
//! Design Notes, §4.5).
//!
//! The source wires hub event callbacks directly to dispatcher methods and
//! vice versa, a cycle. Here neither side holds a concrete reference to the
//! other's type: [`TaskEventsSink`] is implemented by the Task Dispatcher
//! and called by the Worker Hub / Federation Handler on worker/hub replies;
//! [`TransportSender`] is implemented by the Worker Hub / Federation Handler
//! and called by the Task Dispatcher to issue `task:assign`/`task:cancel`.
//! The composition root (`memhub-daemon`) constructs both concrete types and
//! wires them together.

use crate::capability::Capability;
use crate::hub::HubId;
use crate::task::{TaskId, TaskType};
use crate::worker::WorkerId;
use async_trait::async_trait;
use std::collections::HashSet;

/// Destination for a `task:assign`/`task:cancel` send: either a directly
/// connected local worker, or a downstream federated hub acting as a proxy
/// for its own worker pool (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Worker(WorkerId),
    Hub(HubId),
}

/// Called by the Worker Hub / Federation Handler whenever worker or hub
/// lifecycle events occur. Implemented by the Task Dispatcher (spec §4.3
/// "Events emitted outward", §4.5).
#[async_trait]
pub trait TaskEventsSink: Send + Sync {
    /// A local worker finished its connect/auth/register handshake.
    async fn on_worker_connected(&self, worker_id: WorkerId, capabilities: HashSet<Capability>);

    /// A local worker's connection closed (disconnect, heartbeat timeout,
    /// or explicit shutdown message).
    async fn on_worker_disconnected(&self, worker_id: WorkerId);

    /// A downstream hub's connection closed, or its health reports lapsed
    /// past the missed-report threshold (spec §4.4 "Missed reports x
    /// threshold -> mark unhealthy and close"). Symmetric with
    /// [`Self::on_worker_disconnected`]: tasks the hub was proxying are
    /// reset to pending.
    async fn on_hub_disconnected(&self, hub_id: HubId);

    /// A worker (or, via federation, a downstream hub) reported `task:complete`.
    async fn on_task_complete(&self, destination: Destination, task_id: TaskId, result: serde_json::Value, processing_time_ms: u64);

    /// A worker (or hub) reported `task:error`.
    async fn on_task_error(&self, destination: Destination, task_id: TaskId, error: String, retryable: bool);

    /// A worker (or hub) reported `task:progress`. Informational only; does
    /// not drive any state transition (spec §4.5 only reacts to complete/
    /// error/disconnect/timeout).
    async fn on_task_progress(&self, destination: Destination, task_id: TaskId, progress: f64, message: Option<String>);
}

/// Called by the Task Dispatcher to issue wire sends. Implemented by the
/// Worker Hub and the Federation Handler, one per kind of destination (spec
/// §4.5 steps 4-6).
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// The union of capabilities this transport can currently serve,
    /// restricted to idle local workers and healthy/degraded federated hubs
    /// (spec §4.5 step 2).
    fn available_capabilities(&self) -> HashSet<Capability>;

    /// A point-in-time candidate destination currently able to serve
    /// `capability`, without committing anything. The dispatcher races this
    /// against [`Self::send_assign`]'s CAS-backed failure signal (spec §4.5
    /// step 4 destination resolution).
    fn resolve(&self, capability: &Capability) -> Option<Destination>;

    /// Send `task:assign` to `destination`. Returns `false` if the
    /// destination vanished or became busy between capability snapshot and
    /// send (spec §4.3 `assignTask`).
    async fn send_assign(&self, destination: Destination, task_id: TaskId, task_type: TaskType, payload: serde_json::Value, capability: Capability) -> bool;

    /// Best-effort `task:cancel`; the dispatcher does not change task status
    /// on cancel (spec §5 Cancellation), it only relays the signal.
    async fn send_cancel(&self, destination: Destination, task_id: TaskId, reason: Option<String>);

    /// True if this transport currently recognizes `destination` as live.
    fn has_destination(&self, destination: Destination) -> bool;
}

/// Called by the Task Service right after enqueuing a task, so the
/// dispatcher doesn't sit idle until its next ticker sweep. Implemented by
/// the Task Dispatcher (spec §4.6 data flow: "Task Service -> TaskQueue
/// (row) + Event Bus (`task:queued`)").
pub trait DispatchTrigger: Send + Sync {
    fn wake(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_variants_are_distinguishable() {
        let worker = Destination::Worker(WorkerId::new());
        let hub = Destination::Hub(HubId::new());
        assert_ne!(worker, hub);
    }
}
