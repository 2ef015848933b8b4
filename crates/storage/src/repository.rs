// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WAL-backed implementations of the TaskQueue Repository and Hub Registry
//! contracts (spec §4.1, §4.5 Hub Registry).

use crate::error::StorageError;
use crate::filter::{Paging, TaskFilter};
use crate::state::MaterializedState;
use crate::wal::Wal;
use memhub_core::{
    AssignmentKind, Capability, Clock, Hub, HubId, HubKind, HubStatus, Task, TaskConfig, TaskEvent, TaskId, TaskStatus, WorkerId,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Optional fields an `updateStatus` call may set alongside the new status
/// (spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Durable store of task rows (spec §4.1). All operations are atomic with
/// respect to concurrent callers.
pub trait TaskRepository: Send + Sync {
    fn create(&self, config: TaskConfig) -> Result<Task, StorageError>;
    fn create_if_not_exists(&self, config: TaskConfig) -> Result<Option<Task>, StorageError>;
    fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StorageError>;
    fn update_status(&self, id: TaskId, new_status: TaskStatus, patch: StatusPatch) -> Result<Option<Task>, StorageError>;
    fn assign(&self, id: TaskId, worker_id: Option<WorkerId>, hub_id: Option<HubId>, assignment_kind: AssignmentKind) -> Result<Option<Task>, StorageError>;
    /// Increment `retry_count` and persist the bump as its own event, ahead
    /// of whatever `updateStatus` call the dispatcher makes next (spec §4.5
    /// retry semantics).
    fn retry(&self, id: TaskId) -> Result<Option<Task>, StorageError>;
    fn get_next_pending(&self, available_capabilities: &HashSet<Capability>) -> Result<Option<Task>, StorageError>;
    fn get_by_worker_id(&self, worker_id: WorkerId) -> Result<Vec<Task>, StorageError>;
    fn get_by_hub_id(&self, hub_id: HubId) -> Result<Vec<Task>, StorageError>;
    fn list(&self, filter: &TaskFilter, paging: Paging) -> Result<Vec<Task>, StorageError>;
    fn count_by_status(&self) -> Result<HashMap<TaskStatus, usize>, StorageError>;
    fn cleanup(&self, older_than_ms: u64) -> Result<usize, StorageError>;
    fn batch_update_status(&self, ids: &[TaskId], new_status: TaskStatus) -> Result<usize, StorageError>;
    fn compact(&self, snapshot_path: &Path) -> Result<(), StorageError>;
}

struct TaskInner {
    wal: Wal,
    state: MaterializedState,
}

/// WAL-backed [`TaskRepository`], guarded by a single mutex so that every
/// operation (including the `getNextPending`/`assign` compare-and-swap
/// pair) is atomic with respect to concurrent callers.
pub struct WalTaskRepository<C: Clock> {
    inner: Mutex<TaskInner>,
    clock: C,
}

impl<C: Clock> WalTaskRepository<C> {
    /// Open the WAL at `wal_path`, restoring from `snapshot_path` first if
    /// present, then replaying any entries appended since.
    pub fn open(wal_path: &Path, snapshot_path: &Path, clock: C) -> Result<Self, StorageError> {
        let (processed_seq, mut state) = crate::snapshot::load(snapshot_path)?.unwrap_or((0, MaterializedState::default()));
        let mut wal = Wal::open(wal_path, processed_seq)?;
        for entry in wal.entries_after(processed_seq)? {
            state.apply_event(&entry.event);
        }
        Ok(Self { inner: Mutex::new(TaskInner { wal, state }), clock })
    }

    fn append(&self, inner: &mut TaskInner, event: TaskEvent) -> Result<(), StorageError> {
        inner.wal.append(&event)?;
        inner.wal.flush()?;
        inner.state.apply_event(&event);
        Ok(())
    }
}

impl<C: Clock> TaskRepository for WalTaskRepository<C> {
    fn create(&self, config: TaskConfig) -> Result<Task, StorageError> {
        let id = TaskId::new();
        let created_at_epoch_ms = self.clock.epoch_ms();
        let deduplication_key = memhub_core::dedup_key(config.task_type, &config.dedup_seed);
        let event = TaskEvent::TaskCreated {
            id,
            task_type: config.task_type,
            required_capability: config.required_capability,
            fallback_capabilities: config.fallback_capabilities,
            payload: config.payload,
            priority: config.priority,
            max_retries: config.max_retries,
            deduplication_key,
            created_at_epoch_ms,
        };
        let mut inner = self.inner.lock();
        self.append(&mut inner, event)?;
        Ok(inner.state.tasks[&id].clone())
    }

    fn create_if_not_exists(&self, config: TaskConfig) -> Result<Option<Task>, StorageError> {
        let deduplication_key = memhub_core::dedup_key(config.task_type, &config.dedup_seed);
        let mut inner = self.inner.lock();
        let already_pending = inner.state.tasks.values().any(|t| t.deduplication_key == deduplication_key && t.status.is_non_terminal());
        if already_pending {
            return Ok(None);
        }

        let id = TaskId::new();
        let created_at_epoch_ms = self.clock.epoch_ms();
        let event = TaskEvent::TaskCreated {
            id,
            task_type: config.task_type,
            required_capability: config.required_capability,
            fallback_capabilities: config.fallback_capabilities,
            payload: config.payload,
            priority: config.priority,
            max_retries: config.max_retries,
            deduplication_key,
            created_at_epoch_ms,
        };
        self.append(&mut inner, event)?;
        Ok(Some(inner.state.tasks[&id].clone()))
    }

    fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StorageError> {
        Ok(self.inner.lock().state.tasks.get(&id).cloned())
    }

    fn update_status(&self, id: TaskId, new_status: TaskStatus, patch: StatusPatch) -> Result<Option<Task>, StorageError> {
        let mut inner = self.inner.lock();
        if !inner.state.tasks.contains_key(&id) {
            return Ok(None);
        }
        let completed_at_epoch_ms = if new_status == TaskStatus::Completed { Some(self.clock.epoch_ms()) } else { None };
        let event = TaskEvent::TaskStatusChanged { id, status: new_status, result: patch.result, error: patch.error, completed_at_epoch_ms };
        self.append(&mut inner, event)?;
        Ok(inner.state.tasks.get(&id).cloned())
    }

    fn assign(&self, id: TaskId, worker_id: Option<WorkerId>, hub_id: Option<HubId>, assignment_kind: AssignmentKind) -> Result<Option<Task>, StorageError> {
        let mut inner = self.inner.lock();
        match inner.state.tasks.get(&id) {
            Some(task) if task.status == TaskStatus::Pending => {}
            _ => return Ok(None),
        }
        let assigned_at_epoch_ms = self.clock.epoch_ms();
        let event = TaskEvent::TaskAssigned { id, worker_id, hub_id, assignment_kind, assigned_at_epoch_ms };
        self.append(&mut inner, event)?;
        Ok(inner.state.tasks.get(&id).cloned())
    }

    fn retry(&self, id: TaskId) -> Result<Option<Task>, StorageError> {
        let mut inner = self.inner.lock();
        let retry_count = match inner.state.tasks.get(&id) {
            Some(task) => task.retry_count + 1,
            None => return Ok(None),
        };
        self.append(&mut inner, TaskEvent::TaskRetried { id, retry_count })?;
        Ok(inner.state.tasks.get(&id).cloned())
    }

    fn get_next_pending(&self, available_capabilities: &HashSet<Capability>) -> Result<Option<Task>, StorageError> {
        let inner = self.inner.lock();
        let candidate = inner
            .state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| t.capability_order().any(|c| available_capabilities.contains(c)))
            .min_by(|a, b| {
                // Highest priority first, then oldest created_at.
                b.priority.cmp(&a.priority).then(a.created_at_epoch_ms.cmp(&b.created_at_epoch_ms))
            })
            .cloned();
        Ok(candidate)
    }

    fn get_by_worker_id(&self, worker_id: WorkerId) -> Result<Vec<Task>, StorageError> {
        Ok(self.inner.lock().state.tasks.values().filter(|t| t.assigned_worker_id == Some(worker_id)).cloned().collect())
    }

    fn get_by_hub_id(&self, hub_id: HubId) -> Result<Vec<Task>, StorageError> {
        Ok(self.inner.lock().state.tasks.values().filter(|t| t.assigned_hub_id == Some(hub_id)).cloned().collect())
    }

    fn list(&self, filter: &TaskFilter, paging: Paging) -> Result<Vec<Task>, StorageError> {
        let inner = self.inner.lock();
        let mut matched: Vec<Task> = inner.state.tasks.values().filter(|t| filter.matches(t.status, t.task_type)).cloned().collect();
        matched.sort_by_key(|t| t.created_at_epoch_ms);
        Ok(matched.into_iter().skip(paging.offset).take(paging.limit).collect())
    }

    fn count_by_status(&self) -> Result<HashMap<TaskStatus, usize>, StorageError> {
        let inner = self.inner.lock();
        let mut counts = HashMap::new();
        for task in inner.state.tasks.values() {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    fn cleanup(&self, older_than_ms: u64) -> Result<usize, StorageError> {
        let mut inner = self.inner.lock();
        let now = self.clock.epoch_ms();
        let cutoff = now.saturating_sub(older_than_ms);
        let stale: Vec<TaskId> = inner
            .state
            .tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .filter(|t| t.completed_at_epoch_ms.unwrap_or(t.created_at_epoch_ms) < cutoff)
            .map(|t| t.id)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }
        let count = stale.len();
        self.append(&mut inner, TaskEvent::TaskCleanedUp { ids: stale })?;
        Ok(count)
    }

    fn batch_update_status(&self, ids: &[TaskId], new_status: TaskStatus) -> Result<usize, StorageError> {
        let mut inner = self.inner.lock();
        let mut updated = 0;
        for &id in ids {
            if !inner.state.tasks.contains_key(&id) {
                continue;
            }
            let completed_at_epoch_ms = if new_status == TaskStatus::Completed { Some(self.clock.epoch_ms()) } else { None };
            let event = TaskEvent::TaskStatusChanged { id, status: new_status, result: None, error: None, completed_at_epoch_ms };
            self.append(&mut inner, event)?;
            updated += 1;
        }
        Ok(updated)
    }

    fn compact(&self, snapshot_path: &Path) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        let processed_seq = inner.wal.write_seq();
        crate::snapshot::save(snapshot_path, processed_seq, &inner.state)?;
        inner.wal.mark_processed(processed_seq);
        Ok(())
    }
}

/// Durable list of known external hubs (spec §3 Hub, §4.5 Hub Registry).
pub trait HubRegistry: Send + Sync {
    fn register(&self, name: &str, kind: HubKind, priority: i32, weight: u32, region: Option<String>, labels: Vec<String>) -> Result<Hub, StorageError>;
    fn report_health(&self, id: HubId, connected_workers: u32, active_workers: u32, avg_latency_ms: f64, capabilities: HashSet<Capability>) -> Result<Option<Hub>, StorageError>;
    fn set_status(&self, id: HubId, status: HubStatus) -> Result<Option<Hub>, StorageError>;
    fn remove(&self, id: HubId) -> Result<(), StorageError>;
    fn find_by_id(&self, id: HubId) -> Result<Option<Hub>, StorageError>;
    fn find_by_name(&self, name: &str) -> Result<Option<Hub>, StorageError>;
    fn list(&self) -> Result<Vec<Hub>, StorageError>;
}

struct HubInner {
    wal: Wal,
    state: MaterializedState,
}

/// WAL-backed [`HubRegistry`], kept in its own log (`hubs.wal`) independent
/// of the task queue's, since the two subsystems have independent retention
/// and compaction needs.
pub struct WalHubRegistry<C: Clock> {
    inner: Mutex<HubInner>,
    clock: C,
}

impl<C: Clock> WalHubRegistry<C> {
    pub fn open(wal_path: &Path, snapshot_path: &Path, clock: C) -> Result<Self, StorageError> {
        let (processed_seq, mut state) = crate::snapshot::load(snapshot_path)?.unwrap_or((0, MaterializedState::default()));
        let mut wal = Wal::open(wal_path, processed_seq)?;
        for entry in wal.entries_after(processed_seq)? {
            state.apply_event(&entry.event);
        }
        Ok(Self { inner: Mutex::new(HubInner { wal, state }), clock })
    }

    fn append(&self, inner: &mut HubInner, event: TaskEvent) -> Result<(), StorageError> {
        inner.wal.append(&event)?;
        inner.wal.flush()?;
        inner.state.apply_event(&event);
        Ok(())
    }

    pub fn compact(&self, snapshot_path: &Path) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        let processed_seq = inner.wal.write_seq();
        crate::snapshot::save(snapshot_path, processed_seq, &inner.state)?;
        inner.wal.mark_processed(processed_seq);
        Ok(())
    }
}

impl<C: Clock> HubRegistry for WalHubRegistry<C> {
    fn register(&self, name: &str, kind: HubKind, priority: i32, weight: u32, region: Option<String>, labels: Vec<String>) -> Result<Hub, StorageError> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.state.hubs.values().find(|h| h.name == name) {
            return Ok(existing.clone());
        }
        let id = HubId::new();
        let event = TaskEvent::HubRegistered { id, name: name.to_string(), kind, priority, weight, region, labels };
        self.append(&mut inner, event)?;
        Ok(inner.state.hubs[&id].clone())
    }

    fn report_health(&self, id: HubId, connected_workers: u32, active_workers: u32, avg_latency_ms: f64, capabilities: HashSet<Capability>) -> Result<Option<Hub>, StorageError> {
        let mut inner = self.inner.lock();
        if !inner.state.hubs.contains_key(&id) {
            return Ok(None);
        }
        let reported_at_epoch_ms = self.clock.epoch_ms();
        let event = TaskEvent::HubHealthReported { id, connected_workers, active_workers, avg_latency_ms, capabilities, reported_at_epoch_ms };
        self.append(&mut inner, event)?;
        Ok(inner.state.hubs.get(&id).cloned())
    }

    fn set_status(&self, id: HubId, status: HubStatus) -> Result<Option<Hub>, StorageError> {
        let mut inner = self.inner.lock();
        if !inner.state.hubs.contains_key(&id) {
            return Ok(None);
        }
        self.append(&mut inner, TaskEvent::HubStatusChanged { id, status })?;
        Ok(inner.state.hubs.get(&id).cloned())
    }

    fn remove(&self, id: HubId) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        self.append(&mut inner, TaskEvent::HubRemoved { id })
    }

    fn find_by_id(&self, id: HubId) -> Result<Option<Hub>, StorageError> {
        Ok(self.inner.lock().state.hubs.get(&id).cloned())
    }

    fn find_by_name(&self, name: &str) -> Result<Option<Hub>, StorageError> {
        Ok(self.inner.lock().state.hubs.values().find(|h| h.name == name).cloned())
    }

    fn list(&self) -> Result<Vec<Hub>, StorageError> {
        Ok(self.inner.lock().state.hubs.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memhub_core::FakeClock;
    use tempfile::tempdir;

    fn repo(dir: &Path, clock: FakeClock) -> WalTaskRepository<FakeClock> {
        WalTaskRepository::open(&dir.join("tasks.wal"), &dir.join("tasks.snapshot.zst"), clock).unwrap()
    }

    fn config(required: &str) -> TaskConfig {
        let (kind, provider) = required.split_once(':').unwrap();
        TaskConfig::builder(memhub_core::TaskType::Observation, Capability::new(kind, provider)).dedup_seed("seed").build()
    }

    #[test]
    fn create_if_not_exists_coalesces_duplicate_seed() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path(), FakeClock::new());

        let first = repo.create_if_not_exists(config("observation:mistral")).unwrap();
        assert!(first.is_some());

        let second = repo.create_if_not_exists(config("observation:mistral")).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn assign_is_compare_and_swap_on_pending() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path(), FakeClock::new());
        let task = repo.create(config("observation:mistral")).unwrap();

        let assigned = repo.assign(task.id, Some(WorkerId::new()), None, AssignmentKind::Worker).unwrap();
        assert!(assigned.is_some());

        // Already assigned: a second assign attempt must fail.
        let second = repo.assign(task.id, Some(WorkerId::new()), None, AssignmentKind::Worker).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn get_next_pending_prefers_higher_priority_then_oldest() {
        let dir = tempdir().unwrap();
        let clock = FakeClock::new();
        let repo = repo(dir.path(), clock.clone());

        let low = repo.create(config("observation:mistral").clone()).unwrap();
        clock.advance(std::time::Duration::from_millis(10));
        let high_config = TaskConfig::builder(memhub_core::TaskType::Observation, Capability::new("observation", "mistral")).priority(100).dedup_seed("seed2").build();
        let high = repo.create(high_config).unwrap();
        let _ = low;

        let mut caps = HashSet::new();
        caps.insert(Capability::new("observation", "mistral"));
        let next = repo.get_next_pending(&caps).unwrap().unwrap();
        assert_eq!(next.id, high.id);
    }

    #[test]
    fn cleanup_removes_only_stale_terminal_rows() {
        let dir = tempdir().unwrap();
        let clock = FakeClock::new();
        let repo = repo(dir.path(), clock.clone());
        let task = repo.create(config("observation:mistral")).unwrap();
        repo.update_status(task.id, TaskStatus::Completed, StatusPatch { result: Some(serde_json::json!({})), error: None }).unwrap();

        clock.advance(std::time::Duration::from_millis(10_000));
        let removed = repo.cleanup(5_000).unwrap();

        assert_eq!(removed, 1);
        assert!(repo.find_by_id(task.id).unwrap().is_none());
    }

    #[test]
    fn retry_increments_count_and_is_visible_to_find_by_id() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path(), FakeClock::new());
        let task = repo.create(config("observation:mistral")).unwrap();

        let retried = repo.retry(task.id).unwrap().unwrap();
        assert_eq!(retried.retry_count, 1);
        assert_eq!(repo.find_by_id(task.id).unwrap().unwrap().retry_count, 1);
    }

    #[test]
    fn hub_register_is_idempotent_by_name() {
        let dir = tempdir().unwrap();
        let registry = WalHubRegistry::open(&dir.path().join("hubs.wal"), &dir.path().join("hubs.snapshot.zst"), FakeClock::new()).unwrap();

        let first = registry.register("downstream", HubKind::External, 0, 1, None, vec![]).unwrap();
        let second = registry.register("downstream", HubKind::External, 5, 2, None, vec![]).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(registry.list().unwrap().len(), 1);
    }
}
