// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios over the in-process composition (TaskQueue
//! Repository + Event Bus + Task Dispatcher + Task Service), standing in
//! for the real Worker Hub with a manually driven [`TransportSender`]
//! double. No HTTP/CLI surface is in scope for this subsystem, so each
//! scenario drives the public API directly: `TaskService::queueX` to
//! enqueue, the dispatcher's public `TaskEventsSink` methods to simulate
//! what a real hub would report back, and the repository to observe the
//! resulting state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use memhub_bus::EventBus;
use memhub_core::{
    Capability, CoreError, Destination, FakeClock, Task, TaskConfig, TaskEventsSink, TaskId, TaskStatus, TaskType, TransportSender, WorkerId,
};
use memhub_dispatcher::{Dispatcher, DispatcherConfig};
use memhub_service::ports::{ObservationRecord, ObservationRepository, SessionPromptRepository, SummaryRecord, SummaryRepository};
use memhub_service::{QueueClaudeMdRequest, QueueContextGenerateRequest, QueueObservationRequest, ServiceConfig, TaskService};
use memhub_storage::{StatusPatch, TaskRepository, WalTaskRepository};
use tempfile::tempdir;

struct NullObservationRepository;

#[async_trait]
impl ObservationRepository for NullObservationRepository {
    async fn for_session(&self, _session_id: &str) -> Result<Vec<ObservationRecord>, CoreError> {
        Ok(Vec::new())
    }

    async fn recent_for_project(&self, _project: &str, _cwd_prefix: Option<&str>, _limit: usize) -> Result<Vec<ObservationRecord>, CoreError> {
        Ok(Vec::new())
    }

    async fn by_ids(&self, _ids: &[String]) -> Result<Vec<ObservationRecord>, CoreError> {
        Ok(Vec::new())
    }
}

struct NullSessionPromptRepository;

#[async_trait]
impl SessionPromptRepository for NullSessionPromptRepository {
    async fn user_prompt(&self, _session_id: &str) -> Result<Option<String>, CoreError> {
        Ok(None)
    }
}

struct NullSummaryRepository;

#[async_trait]
impl SummaryRepository for NullSummaryRepository {
    async fn recent_for_project(&self, _project: &str, _limit: usize) -> Result<Vec<SummaryRecord>, CoreError> {
        Ok(Vec::new())
    }
}

/// State of one simulated worker connection: its advertised capabilities
/// and whether it is currently free to take an assignment.
struct WorkerState {
    capabilities: HashSet<Capability>,
    idle: bool,
}

/// A hand-driven [`TransportSender`] double standing in for a real Worker
/// Hub, so these scenarios can simulate connects, disconnects, and idle
/// transitions without a live WebSocket (mirrors `FakeTransport` in
/// `memhub-dispatcher`'s own unit tests, extended with mutable worker
/// state across several dispatch cycles).
#[derive(Default)]
struct ManualTransport {
    workers: Mutex<HashMap<WorkerId, WorkerState>>,
}

impl ManualTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn connect_worker(&self, id: WorkerId, capabilities: &[Capability]) {
        self.workers.lock().unwrap().insert(id, WorkerState { capabilities: capabilities.iter().cloned().collect(), idle: true });
    }

    fn disconnect_worker(&self, id: WorkerId) {
        self.workers.lock().unwrap().remove(&id);
    }

    fn mark_idle(&self, id: WorkerId) {
        if let Some(state) = self.workers.lock().unwrap().get_mut(&id) {
            state.idle = true;
        }
    }
}

#[async_trait]
impl TransportSender for ManualTransport {
    fn available_capabilities(&self) -> HashSet<Capability> {
        self.workers.lock().unwrap().values().filter(|w| w.idle).flat_map(|w| w.capabilities.iter().cloned()).collect()
    }

    fn resolve(&self, capability: &Capability) -> Option<Destination> {
        self.workers.lock().unwrap().iter().find(|(_, w)| w.idle && w.capabilities.contains(capability)).map(|(id, _)| Destination::Worker(*id))
    }

    async fn send_assign(&self, destination: Destination, _task_id: TaskId, _task_type: TaskType, _payload: serde_json::Value, _capability: Capability) -> bool {
        let Destination::Worker(worker_id) = destination else { return false };
        let mut workers = self.workers.lock().unwrap();
        match workers.get_mut(&worker_id) {
            Some(state) if state.idle => {
                state.idle = false;
                true
            }
            _ => false,
        }
    }

    async fn send_cancel(&self, _destination: Destination, _task_id: TaskId, _reason: Option<String>) {}

    fn has_destination(&self, destination: Destination) -> bool {
        match destination {
            Destination::Worker(id) => self.workers.lock().unwrap().contains_key(&id),
            Destination::Hub(_) => false,
        }
    }
}

/// Wires the TaskQueue Repository, Event Bus, Task Dispatcher and Task
/// Service together the way `memhub-daemon`'s composition root does,
/// minus the Worker Hub/Federation Handler (replaced by
/// [`ManualTransport`]) and the WAL compaction/heartbeat loops, which no
/// scenario here needs.
struct Harness {
    repository: Arc<WalTaskRepository<FakeClock>>,
    dispatcher: Arc<Dispatcher<FakeClock>>,
    transport: Arc<ManualTransport>,
    service: Arc<TaskService>,
    _dispatcher_task: tokio::task::JoinHandle<()>,
}

impl Harness {
    async fn new(dir: &std::path::Path, max_pending_tasks: usize) -> Self {
        let clock = FakeClock::new();
        let repository = Arc::new(WalTaskRepository::open(&dir.join("tasks.wal"), &dir.join("tasks.snapshot.zst"), clock.clone()).unwrap());
        let bus = Arc::new(EventBus::new());
        let transport = ManualTransport::new();

        let dispatcher = Dispatcher::new(
            DispatcherConfig { tick_interval: Duration::from_millis(10), task_timeout_ms: 300_000 },
            clock,
            repository.clone(),
            transport.clone(),
            None,
            Some(bus.clone()),
        );
        let dispatcher_task = tokio::spawn(dispatcher.clone().run());

        let config = ServiceConfig { max_pending_tasks, ..ServiceConfig::default() };
        let service = Arc::new(TaskService::new(
            repository.clone(),
            bus,
            Some(dispatcher.clone()),
            config,
            Arc::new(NullObservationRepository),
            Arc::new(NullSessionPromptRepository),
            Arc::new(NullSummaryRepository),
        ));

        Self { repository, dispatcher, transport, service, _dispatcher_task: dispatcher_task }
    }
}

/// Polls the repository until `task_id` reaches `status`, or panics after
/// one second. Scenarios can't await the dispatcher's internal cycle
/// directly (it's private to `memhub-dispatcher`), so this is the harness
/// equivalent of "wait for the state a real client would observe".
async fn wait_for_status(repository: &WalTaskRepository<FakeClock>, task_id: TaskId, status: TaskStatus) -> Task {
    for _ in 0..200 {
        if let Some(task) = repository.find_by_id(task_id).unwrap() {
            if task.status == status {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {task_id} did not reach {status:?} in time");
}

fn observation_request(session_id: &str) -> QueueObservationRequest {
    QueueObservationRequest {
        session_id: session_id.to_string(),
        project: "proj".to_string(),
        tool_name: "Read".to_string(),
        tool_input: serde_json::json!({}),
        tool_output: serde_json::json!("contents"),
        prompt_number: Some(3),
        preferred_provider: None,
        git_branch: None,
        cwd: None,
        target_directory: None,
    }
}

#[tokio::test]
async fn happy_path_observation_completes_with_default_provider() {
    let dir = tempdir().unwrap();
    let harness = Harness::new(dir.path(), 1000).await;

    let worker_id = WorkerId::new();
    harness.transport.connect_worker(worker_id, &[Capability::new("observation", "mistral")]);

    let task = harness.service.queue_observation(observation_request("s1")).await.unwrap();
    assert_eq!(task.required_capability.as_str(), "observation:mistral");

    let assigned = wait_for_status(&harness.repository, task.id, TaskStatus::Processing).await;
    assert_eq!(assigned.assigned_worker_id, Some(worker_id));

    harness.dispatcher.on_task_complete(Destination::Worker(worker_id), task.id, serde_json::json!({"observationId": 42}), 120).await;

    let completed = wait_for_status(&harness.repository, task.id, TaskStatus::Completed).await;
    assert_eq!(completed.result, Some(serde_json::json!({"observationId": 42})));
}

#[tokio::test]
async fn falls_back_to_a_worker_advertising_only_a_fallback_capability() {
    let dir = tempdir().unwrap();
    let harness = Harness::new(dir.path(), 1000).await;

    // Only a gemini worker is connected; mistral is the default required
    // capability, so the dispatcher must walk the fallback list to match it.
    let worker_id = WorkerId::new();
    harness.transport.connect_worker(worker_id, &[Capability::new("observation", "gemini")]);

    let task = harness.service.queue_observation(observation_request("s2")).await.unwrap();
    assert_eq!(task.required_capability.as_str(), "observation:mistral");
    assert!(task.fallback_capabilities.iter().any(|c| c.as_str() == "observation:gemini"));

    let assigned = wait_for_status(&harness.repository, task.id, TaskStatus::Processing).await;
    assert_eq!(assigned.assigned_worker_id, Some(worker_id));
}

#[tokio::test]
async fn task_exhausts_retries_then_fails() {
    let dir = tempdir().unwrap();
    let harness = Harness::new(dir.path(), 1000).await;

    let worker_id = WorkerId::new();
    let capability = Capability::new("observation", "mistral");
    harness.transport.connect_worker(worker_id, &[capability.clone()]);

    let config = TaskConfig::builder(TaskType::Observation, capability).max_retries(2).dedup_seed("retry-seed").build();
    let task = harness.repository.create(config).unwrap();
    harness.dispatcher.wake();

    for attempt in 0..3 {
        let assigned = wait_for_status(&harness.repository, task.id, TaskStatus::Processing).await;
        assert_eq!(assigned.assigned_worker_id, Some(worker_id));
        assert_eq!(assigned.retry_count, attempt);

        harness.dispatcher.on_task_error(Destination::Worker(worker_id), task.id, "boom".to_string(), true).await;

        if attempt < 2 {
            harness.transport.mark_idle(worker_id);
            harness.dispatcher.wake();
        }
    }

    let failed = wait_for_status(&harness.repository, task.id, TaskStatus::Failed).await;
    assert_eq!(failed.retry_count, 2);
    assert_eq!(failed.error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn concurrent_claude_md_requests_coalesce_to_one_task() {
    let dir = tempdir().unwrap();
    let harness = Harness::new(dir.path(), 1000).await;

    let request = || QueueClaudeMdRequest {
        content_session_id: "content-1".to_string(),
        memory_session_id: "memory-1".to_string(),
        project: "proj".to_string(),
        working_directory: None,
        target_directory: None,
    };

    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = harness.service.clone();
        let req = request();
        handles.push(tokio::spawn(async move { service.queue_claude_md(req).await.unwrap() }));
    }

    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            created += 1;
        }
    }
    assert_eq!(created, 1, "a burst of identical claude-md requests must coalesce to a single task");
}

#[tokio::test]
async fn backpressure_blocks_then_unblocks_as_capacity_frees() {
    let dir = tempdir().unwrap();
    // check_backpressure rejects once the active count *at* the cap would
    // be reached, so cap=3 admits exactly 3 tasks before the 4th fails.
    let harness = Harness::new(dir.path(), 3).await;

    let make_request = |query: &str| QueueContextGenerateRequest { project: "proj".to_string(), query: Some(query.to_string()), limit: None };

    let mut tasks = Vec::new();
    for i in 0..3 {
        let task = harness.service.queue_context_generate(make_request(&format!("q{i}"))).await.unwrap();
        tasks.push(task);
    }

    let err = harness.service.queue_context_generate(make_request("overflow")).await.unwrap_err();
    assert!(matches!(err, CoreError::QueueFull { .. }));

    harness.repository.update_status(tasks[0].id, TaskStatus::Completed, StatusPatch { result: Some(serde_json::json!({})), error: None }).unwrap();

    let recovered = harness.service.queue_context_generate(make_request("recovered")).await.unwrap();
    assert_eq!(recovered.status, TaskStatus::Pending);
}

#[tokio::test]
async fn task_reassigns_to_another_worker_after_disconnect() {
    let dir = tempdir().unwrap();
    let harness = Harness::new(dir.path(), 1000).await;

    let capability = Capability::new("observation", "mistral");
    let w1 = WorkerId::new();
    harness.transport.connect_worker(w1, &[capability.clone()]);

    let task = harness.service.queue_observation(observation_request("s3")).await.unwrap();
    let assigned = wait_for_status(&harness.repository, task.id, TaskStatus::Processing).await;
    assert_eq!(assigned.assigned_worker_id, Some(w1));

    harness.dispatcher.on_worker_disconnected(w1).await;
    harness.transport.disconnect_worker(w1);

    let reset = wait_for_status(&harness.repository, task.id, TaskStatus::Pending).await;
    assert!(reset.assigned_worker_id.is_none());
    assert_eq!(reset.retry_count, 0, "a disconnect reset is not a retry");

    let w2 = WorkerId::new();
    harness.transport.connect_worker(w2, &[capability]);
    harness.dispatcher.wake();

    let reassigned = wait_for_status(&harness.repository, task.id, TaskStatus::Processing).await;
    assert_eq!(reassigned.assigned_worker_id, Some(w2));

    harness.dispatcher.on_task_complete(Destination::Worker(w2), task.id, serde_json::json!({"observationId": 7}), 50).await;
    let completed = wait_for_status(&harness.repository, task.id, TaskStatus::Completed).await;
    assert_eq!(completed.assigned_worker_id, Some(w2));
}
