// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The dispatch loop itself (spec §4.5).

use async_trait::async_trait;
use memhub_core::{
    AssignmentKind, Capability, Clock, Destination, DispatchTrigger, HubId, Task, TaskEventsSink, TaskId, TaskStatus, TaskType, TransportSender,
    WorkerId,
};
use memhub_bus::EventBus;
use memhub_storage::{Paging, StatusPatch, TaskFilter, TaskRepository};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Tunables for the Task Dispatcher (spec §5 defaults).
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How often the loop wakes on its own, independent of triggers.
    pub tick_interval: Duration,
    /// `assigned`/`processing` tasks older than this are moved to `timeout`.
    pub task_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { tick_interval: Duration::from_secs(1), task_timeout_ms: 300_000 }
    }
}

/// The scheduler proper: matches pending tasks against available worker and
/// hub capacity, commits the assignment, and reacts to lifecycle callbacks
/// (spec §4.5).
pub struct Dispatcher<C: Clock> {
    config: DispatcherConfig,
    clock: C,
    repository: Arc<dyn TaskRepository>,
    worker_transport: Arc<dyn TransportSender>,
    hub_transport: Option<Arc<dyn TransportSender>>,
    bus: Option<Arc<EventBus>>,
    notify: Notify,
    shutdown: AtomicBool,
}

impl<C: Clock> Dispatcher<C> {
    pub fn new(
        config: DispatcherConfig,
        clock: C,
        repository: Arc<dyn TaskRepository>,
        worker_transport: Arc<dyn TransportSender>,
        hub_transport: Option<Arc<dyn TransportSender>>,
        bus: Option<Arc<EventBus>>,
    ) -> Arc<Self> {
        Arc::new(Self { config, clock, repository, worker_transport, hub_transport, bus, notify: Notify::new(), shutdown: AtomicBool::new(false) })
    }

    /// Wake the loop for an out-of-band dispatch cycle (spec §4.5 "Loop,
    /// executed on a ticker ... and on any of: worker connected, task
    /// completed, task errored, worker disconnected").
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Stop the dispatcher ticker (spec §5 shutdown). `run` returns once the
    /// in-flight cycle, if any, finishes.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Drive the dispatch loop until [`Self::request_shutdown`] is called.
    /// Intended to be spawned as its own task by the composition root.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.tick().await; // first tick fires immediately; skip it

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.notify.notified() => {}
            }
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.sweep_timeouts();
            self.dispatch_cycle().await;
        }
        tracing::info!("dispatcher: stopped");
    }

    /// Repeatedly assign whatever pending tasks current capacity can serve,
    /// until nothing more can be matched this cycle.
    async fn dispatch_cycle(&self) {
        loop {
            match self.dispatch_once().await {
                DispatchOutcome::NoPending => break,
                DispatchOutcome::StorageFailure => break,
                DispatchOutcome::Raced | DispatchOutcome::SendFailed | DispatchOutcome::Assigned => continue,
            }
        }
    }

    /// One iteration of spec §4.5 steps 1-7.
    async fn dispatch_once(&self) -> DispatchOutcome {
        let mut available = self.worker_transport.available_capabilities();
        if let Some(hub_transport) = &self.hub_transport {
            available.extend(hub_transport.available_capabilities());
        }
        if available.is_empty() {
            // No worker or hub currently advertises any capability: nothing
            // to match against (spec §4.5 step 1).
            return DispatchOutcome::NoPending;
        }

        let task = match self.repository.get_next_pending(&available) {
            Ok(Some(task)) => task,
            Ok(None) => return DispatchOutcome::NoPending,
            Err(err) => {
                tracing::error!(%err, "dispatcher: failed to read next pending task");
                return DispatchOutcome::StorageFailure;
            }
        };

        let Some((transport, destination, capability)) = self.resolve_destination(&task) else {
            // Capability is in the available set (otherwise getNextPending
            // wouldn't have returned it) but no single transport resolved it
            // to a concrete candidate between the two calls; retry next cycle.
            return DispatchOutcome::NoPending;
        };

        let (worker_id, hub_id, kind) = match destination {
            Destination::Worker(id) => (Some(id), None, AssignmentKind::Worker),
            Destination::Hub(id) => (None, Some(id), AssignmentKind::Hub),
        };

        let assigned = match self.repository.assign(task.id, worker_id, hub_id, kind) {
            Ok(Some(assigned)) => assigned,
            Ok(None) => {
                // Another trigger's cycle beat us to this row; benign (spec §5).
                return DispatchOutcome::Raced;
            }
            Err(err) => {
                tracing::error!(%err, task_id = %task.id, "dispatcher: failed to commit assignment");
                return DispatchOutcome::StorageFailure;
            }
        };

        let sent = transport.send_assign(destination, assigned.id, assigned.task_type, assigned.payload.clone(), capability).await;
        if !sent {
            if let Err(err) = self.repository.update_status(assigned.id, TaskStatus::Pending, StatusPatch::default()) {
                tracing::error!(%err, task_id = %assigned.id, "dispatcher: failed to release task after send failure");
            }
            tracing::warn!(task_id = %assigned.id, ?destination, "dispatcher: send failed, released back to pending");
            return DispatchOutcome::SendFailed;
        }

        if let Err(err) = self.repository.update_status(assigned.id, TaskStatus::Processing, StatusPatch::default()) {
            tracing::error!(%err, task_id = %assigned.id, "dispatcher: failed to mark task processing");
            return DispatchOutcome::StorageFailure;
        }

        if let Some(bus) = &self.bus {
            bus.publish("task:assigned", serde_json::json!({"id": assigned.id, "taskType": assigned.task_type}));
        }
        DispatchOutcome::Assigned
    }

    /// Local worker wins over a federated hub regardless of which
    /// capability in `task.capability_order()` matches (spec §4.5 step 4:
    /// "Federated hub selected only if no local match").
    fn resolve_destination(&self, task: &Task) -> Option<(&Arc<dyn TransportSender>, Destination, Capability)> {
        for capability in task.capability_order() {
            if let Some(destination) = self.worker_transport.resolve(capability) {
                return Some((&self.worker_transport, destination, capability.clone()));
            }
        }
        let hub_transport = self.hub_transport.as_ref()?;
        for capability in task.capability_order() {
            if let Some(destination) = hub_transport.resolve(capability) {
                return Some((hub_transport, destination, capability.clone()));
            }
        }
        None
    }

    /// `assigned`/`processing` tasks past `taskTimeoutMs` become terminal
    /// (spec §4.5 "Timeout sweeper").
    fn sweep_timeouts(&self) {
        let now = self.clock.epoch_ms();
        for status in [TaskStatus::Assigned, TaskStatus::Processing] {
            let filter = TaskFilter { status: Some(status), task_type: None };
            let tasks = match self.repository.list(&filter, Paging::all()) {
                Ok(tasks) => tasks,
                Err(err) => {
                    tracing::error!(%err, ?status, "dispatcher: failed to list tasks for timeout sweep");
                    continue;
                }
            };
            for task in tasks {
                let Some(assigned_at) = task.assigned_at_epoch_ms else { continue };
                if now.saturating_sub(assigned_at) <= self.config.task_timeout_ms {
                    continue;
                }
                let patch = StatusPatch { result: None, error: Some("Task timed out".to_string()) };
                if let Err(err) = self.repository.update_status(task.id, TaskStatus::Timeout, patch) {
                    tracing::error!(%err, task_id = %task.id, "dispatcher: failed to mark task timed out");
                    continue;
                }
                tracing::warn!(task_id = %task.id, "dispatcher: task timed out");
                if let Some(bus) = &self.bus {
                    bus.publish("task:timeout", serde_json::json!({"id": task.id}));
                }
            }
        }
    }

    /// Reset every task still owned by `owner` back to `pending` (not a
    /// retry, since the owner never completed it productively), shared by
    /// the worker- and hub-disconnect paths (spec §4.5 "Worker disconnect").
    fn release_owned_tasks(&self, tasks: Result<Vec<Task>, memhub_storage::StorageError>) {
        let tasks = match tasks {
            Ok(tasks) => tasks,
            Err(err) => {
                tracing::error!(%err, "dispatcher: failed to list tasks for disconnect reset");
                return;
            }
        };
        for task in tasks.into_iter().filter(|t| matches!(t.status, TaskStatus::Assigned | TaskStatus::Processing)) {
            if let Err(err) = self.repository.update_status(task.id, TaskStatus::Pending, StatusPatch::default()) {
                tracing::error!(%err, task_id = %task.id, "dispatcher: failed to reset disconnected task");
            }
        }
    }
}

enum DispatchOutcome {
    NoPending,
    Raced,
    SendFailed,
    Assigned,
    StorageFailure,
}

impl<C: Clock> DispatchTrigger for Dispatcher<C> {
    fn wake(&self) {
        Dispatcher::wake(self)
    }
}

#[async_trait]
impl<C: Clock> TaskEventsSink for Dispatcher<C> {
    async fn on_worker_connected(&self, _worker_id: WorkerId, _capabilities: HashSet<Capability>) {
        self.wake();
    }

    async fn on_worker_disconnected(&self, worker_id: WorkerId) {
        self.release_owned_tasks(self.repository.get_by_worker_id(worker_id));
        self.wake();
    }

    async fn on_hub_disconnected(&self, hub_id: HubId) {
        self.release_owned_tasks(self.repository.get_by_hub_id(hub_id));
        self.wake();
    }

    async fn on_task_complete(&self, _destination: Destination, task_id: TaskId, result: serde_json::Value, _processing_time_ms: u64) {
        let patch = StatusPatch { result: Some(result), error: None };
        if let Err(err) = self.repository.update_status(task_id, TaskStatus::Completed, patch) {
            tracing::error!(%err, %task_id, "dispatcher: failed to mark task completed");
        } else if let Some(bus) = &self.bus {
            bus.publish("task:completed", serde_json::json!({"id": task_id}));
        }
        self.wake();
    }

    async fn on_task_error(&self, _destination: Destination, task_id: TaskId, error: String, retryable: bool) {
        let task = match self.repository.find_by_id(task_id) {
            Ok(Some(task)) => task,
            Ok(None) => return,
            Err(err) => {
                tracing::error!(%err, %task_id, "dispatcher: failed to fetch task for retry decision");
                return;
            }
        };

        if !retryable || task.retry_count >= task.max_retries {
            let patch = StatusPatch { result: None, error: Some(error) };
            if let Err(err) = self.repository.update_status(task_id, TaskStatus::Failed, patch) {
                tracing::error!(%err, %task_id, "dispatcher: failed to mark task failed");
            } else if let Some(bus) = &self.bus {
                bus.publish("task:failed", serde_json::json!({"id": task_id}));
            }
        } else {
            if let Err(err) = self.repository.retry(task_id) {
                tracing::error!(%err, %task_id, "dispatcher: failed to record retry");
            }
            let patch = StatusPatch { result: None, error: Some(error) };
            if let Err(err) = self.repository.update_status(task_id, TaskStatus::Pending, patch) {
                tracing::error!(%err, %task_id, "dispatcher: failed to return task to pending after error");
            }
        }
        self.wake();
    }

    async fn on_task_progress(&self, destination: Destination, task_id: TaskId, progress: f64, message: Option<String>) {
        if let Some(bus) = &self.bus {
            let destination = match destination {
                Destination::Worker(id) => serde_json::json!({"worker": id}),
                Destination::Hub(id) => serde_json::json!({"hub": id}),
            };
            bus.publish("task:progress", serde_json::json!({"id": task_id, "progress": progress, "message": message, "destination": destination}));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memhub_core::test_support::sample_task;
    use memhub_core::{FakeClock, TaskConfig, TaskType};
    use memhub_storage::WalTaskRepository;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use tempfile::tempdir;

    /// Deterministic in-memory [`TransportSender`] double standing in for a
    /// real Worker Hub or Federation Handler.
    struct FakeTransport {
        capabilities: HashSet<Capability>,
        destinations: HashMap<Capability, Destination>,
        accept: bool,
        sent: Mutex<Vec<(Destination, TaskId)>>,
    }

    impl FakeTransport {
        fn idle_worker(worker_id: WorkerId, capability: Capability) -> Self {
            let destination = Destination::Worker(worker_id);
            Self { capabilities: HashSet::from([capability.clone()]), destinations: HashMap::from([(capability, destination)]), accept: true, sent: Mutex::new(Vec::new()) }
        }

        fn empty() -> Self {
            Self { capabilities: HashSet::new(), destinations: HashMap::new(), accept: true, sent: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl TransportSender for FakeTransport {
        fn available_capabilities(&self) -> HashSet<Capability> {
            self.capabilities.clone()
        }

        fn resolve(&self, capability: &Capability) -> Option<Destination> {
            self.destinations.get(capability).copied()
        }

        async fn send_assign(&self, destination: Destination, task_id: TaskId, _task_type: TaskType, _payload: serde_json::Value, _capability: Capability) -> bool {
            if self.accept {
                self.sent.lock().push((destination, task_id));
            }
            self.accept
        }

        async fn send_cancel(&self, _destination: Destination, _task_id: TaskId, _reason: Option<String>) {}

        fn has_destination(&self, destination: Destination) -> bool {
            self.destinations.values().any(|d| *d == destination)
        }
    }

    fn repo(dir: &std::path::Path) -> Arc<WalTaskRepository<FakeClock>> {
        Arc::new(WalTaskRepository::open(&dir.join("tasks.wal"), &dir.join("tasks.snapshot.zst"), FakeClock::new()).unwrap())
    }

    #[tokio::test]
    async fn dispatch_once_assigns_to_the_only_idle_worker() {
        let dir = tempdir().unwrap();
        let repository = repo(dir.path());
        let capability = Capability::new("observation", "mistral");
        let worker_id = WorkerId::new();
        let transport = Arc::new(FakeTransport::idle_worker(worker_id, capability.clone()));

        let dispatcher = Dispatcher::new(DispatcherConfig::default(), FakeClock::new(), repository.clone(), transport.clone(), None, None);

        let config = TaskConfig::builder(TaskType::Observation, capability).dedup_seed("seed").build();
        let task = repository.create(config).unwrap();

        let outcome = dispatcher.dispatch_once().await;
        assert!(matches!(outcome, DispatchOutcome::Assigned));

        let stored = repository.find_by_id(task.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Processing);
        assert_eq!(stored.assigned_worker_id, Some(worker_id));
    }

    #[tokio::test]
    async fn dispatch_once_is_a_noop_with_no_capacity() {
        let dir = tempdir().unwrap();
        let repository = repo(dir.path());
        let transport = Arc::new(FakeTransport::empty());
        let dispatcher = Dispatcher::new(DispatcherConfig::default(), FakeClock::new(), repository.clone(), transport, None, None);

        let config = TaskConfig::builder(TaskType::Observation, Capability::new("observation", "mistral")).dedup_seed("seed").build();
        repository.create(config).unwrap();

        let outcome = dispatcher.dispatch_once().await;
        assert!(matches!(outcome, DispatchOutcome::NoPending));
    }

    #[tokio::test]
    async fn on_task_error_retries_until_max_then_fails() {
        let dir = tempdir().unwrap();
        let repository = repo(dir.path());
        let transport = Arc::new(FakeTransport::empty());
        let dispatcher = Dispatcher::new(DispatcherConfig::default(), FakeClock::new(), repository.clone(), transport, None, None);

        let config = TaskConfig::builder(TaskType::Observation, Capability::new("observation", "mistral")).max_retries(2).dedup_seed("seed").build();
        let task = repository.create(config).unwrap();

        dispatcher.on_task_error(Destination::Worker(WorkerId::new()), task.id, "boom".into(), true).await;
        assert_eq!(repository.find_by_id(task.id).unwrap().unwrap().status, TaskStatus::Pending);
        assert_eq!(repository.find_by_id(task.id).unwrap().unwrap().retry_count, 1);

        dispatcher.on_task_error(Destination::Worker(WorkerId::new()), task.id, "boom".into(), true).await;
        assert_eq!(repository.find_by_id(task.id).unwrap().unwrap().retry_count, 2);

        dispatcher.on_task_error(Destination::Worker(WorkerId::new()), task.id, "boom".into(), true).await;
        let final_task = repository.find_by_id(task.id).unwrap().unwrap();
        assert_eq!(final_task.status, TaskStatus::Failed);
        assert_eq!(final_task.retry_count, 2);
    }

    #[tokio::test]
    async fn on_task_error_fails_immediately_when_not_retryable() {
        let dir = tempdir().unwrap();
        let repository = repo(dir.path());
        let transport = Arc::new(FakeTransport::empty());
        let dispatcher = Dispatcher::new(DispatcherConfig::default(), FakeClock::new(), repository.clone(), transport, None, None);

        let config = TaskConfig::builder(TaskType::Observation, Capability::new("observation", "mistral")).dedup_seed("seed").build();
        let task = repository.create(config).unwrap();

        dispatcher.on_task_error(Destination::Worker(WorkerId::new()), task.id, "cancelled".into(), false).await;
        assert_eq!(repository.find_by_id(task.id).unwrap().unwrap().status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn worker_disconnect_resets_owned_tasks_to_pending() {
        let dir = tempdir().unwrap();
        let repository = repo(dir.path());
        let worker_id = WorkerId::new();
        let capability = Capability::new("observation", "mistral");
        let transport = Arc::new(FakeTransport::idle_worker(worker_id, capability.clone()));
        let dispatcher = Dispatcher::new(DispatcherConfig::default(), FakeClock::new(), repository.clone(), transport, None, None);

        let config = TaskConfig::builder(TaskType::Observation, capability).dedup_seed("seed").build();
        let task = repository.create(config).unwrap();
        repository.assign(task.id, Some(worker_id), None, AssignmentKind::Worker).unwrap();
        repository.update_status(task.id, TaskStatus::Processing, StatusPatch::default()).unwrap();

        dispatcher.on_worker_disconnected(worker_id).await;

        let reset = repository.find_by_id(task.id).unwrap().unwrap();
        assert_eq!(reset.status, TaskStatus::Pending);
        assert!(reset.assigned_worker_id.is_none());
    }

    #[test]
    fn sample_task_helper_is_pending() {
        let task = sample_task(TaskType::Observation, "observation:mistral", 1000);
        assert_eq!(task.status, TaskStatus::Pending);
    }
}
