// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state built by folding [`TaskEvent`]s from the WAL.
//!
//! # Idempotency requirement
//!
//! All handlers in [`MaterializedState::apply_event`] MUST be idempotent:
//! applying the same event twice must produce the same state as applying it
//! once, since events are applied both at append time (for immediate
//! in-memory visibility) and again during WAL replay after a restart.
//! Guard inserts with existence checks; use assignment rather than `+=`;
//! guard counters with status checks so a replayed event can't double-count.

use memhub_core::{Hub, HubId, Task, TaskEvent, TaskId, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MaterializedState {
    pub tasks: HashMap<TaskId, Task>,
    pub hubs: HashMap<HubId, Hub>,
}

impl MaterializedState {
    pub fn apply_event(&mut self, event: &TaskEvent) {
        match event {
            TaskEvent::TaskCreated {
                id,
                task_type,
                required_capability,
                fallback_capabilities,
                payload,
                priority,
                max_retries,
                deduplication_key,
                created_at_epoch_ms,
            } => {
                // Idempotency: skip if this id already has a row.
                self.tasks.entry(*id).or_insert_with(|| Task {
                    id: *id,
                    task_type: *task_type,
                    status: TaskStatus::Pending,
                    required_capability: required_capability.clone(),
                    fallback_capabilities: fallback_capabilities.clone(),
                    payload: payload.clone(),
                    priority: *priority,
                    retry_count: 0,
                    max_retries: *max_retries,
                    deduplication_key: deduplication_key.clone(),
                    assigned_worker_id: None,
                    assigned_hub_id: None,
                    assignment_kind: None,
                    created_at_epoch_ms: *created_at_epoch_ms,
                    assigned_at_epoch_ms: None,
                    completed_at_epoch_ms: None,
                    result: None,
                    error: None,
                });
            }

            TaskEvent::TaskAssigned { id, worker_id, hub_id, assignment_kind, assigned_at_epoch_ms } => {
                if let Some(task) = self.tasks.get_mut(id) {
                    task.status = TaskStatus::Assigned;
                    task.assigned_worker_id = *worker_id;
                    task.assigned_hub_id = *hub_id;
                    task.assignment_kind = Some(*assignment_kind);
                    task.assigned_at_epoch_ms = Some(*assigned_at_epoch_ms);
                }
            }

            TaskEvent::TaskStatusChanged { id, status, result, error, completed_at_epoch_ms } => {
                if let Some(task) = self.tasks.get_mut(id) {
                    task.status = *status;
                    if result.is_some() {
                        task.result = result.clone();
                    }
                    if error.is_some() {
                        task.error = error.clone();
                    }
                    if completed_at_epoch_ms.is_some() {
                        task.completed_at_epoch_ms = *completed_at_epoch_ms;
                    }
                    if *status == TaskStatus::Pending {
                        // Released back into the pool: clear the prior assignment.
                        task.assigned_worker_id = None;
                        task.assigned_hub_id = None;
                        task.assignment_kind = None;
                        task.assigned_at_epoch_ms = None;
                    }
                }
            }

            TaskEvent::TaskRetried { id, retry_count } => {
                if let Some(task) = self.tasks.get_mut(id) {
                    // Idempotency: only move forward, never re-apply a stale replay.
                    task.retry_count = task.retry_count.max(*retry_count);
                }
            }

            TaskEvent::TaskCleanedUp { ids } => {
                for id in ids {
                    self.tasks.remove(id);
                }
            }

            TaskEvent::HubRegistered { id, name, kind, priority, weight, region, labels } => {
                self.hubs.entry(*id).or_insert_with(|| Hub {
                    id: *id,
                    name: name.clone(),
                    kind: *kind,
                    priority: *priority,
                    weight: *weight,
                    region: region.clone(),
                    labels: labels.clone(),
                    status: memhub_core::HubStatus::Healthy,
                    connected_workers: 0,
                    active_workers: 0,
                    avg_latency_ms: 0.0,
                    capabilities: Default::default(),
                    last_health_report_epoch_ms: None,
                });
            }

            TaskEvent::HubHealthReported { id, connected_workers, active_workers, avg_latency_ms, capabilities, reported_at_epoch_ms } => {
                if let Some(hub) = self.hubs.get_mut(id) {
                    hub.connected_workers = *connected_workers;
                    hub.active_workers = *active_workers;
                    hub.avg_latency_ms = *avg_latency_ms;
                    hub.capabilities = capabilities.clone();
                    hub.last_health_report_epoch_ms = Some(*reported_at_epoch_ms);
                }
            }

            TaskEvent::HubStatusChanged { id, status } => {
                if let Some(hub) = self.hubs.get_mut(id) {
                    hub.status = *status;
                }
            }

            TaskEvent::HubRemoved { id } => {
                self.hubs.remove(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memhub_core::{AssignmentKind, Capability, HubKind, TaskType};

    fn created_event(id: TaskId) -> TaskEvent {
        TaskEvent::TaskCreated {
            id,
            task_type: TaskType::Observation,
            required_capability: Capability::new("observation", "mistral"),
            fallback_capabilities: vec![],
            payload: serde_json::Value::Null,
            priority: 50,
            max_retries: 3,
            deduplication_key: "dedup".into(),
            created_at_epoch_ms: 1000,
        }
    }

    #[test]
    fn task_created_is_idempotent() {
        let id = TaskId::new();
        let mut state = MaterializedState::default();
        state.apply_event(&created_event(id));
        state.apply_event(&created_event(id));
        assert_eq!(state.tasks.len(), 1);
    }

    #[test]
    fn task_assigned_sets_assignment_fields() {
        let id = TaskId::new();
        let mut state = MaterializedState::default();
        state.apply_event(&created_event(id));
        state.apply_event(&TaskEvent::TaskAssigned {
            id,
            worker_id: Some(memhub_core::WorkerId::new()),
            hub_id: None,
            assignment_kind: AssignmentKind::Worker,
            assigned_at_epoch_ms: 2000,
        });
        let task = &state.tasks[&id];
        assert_eq!(task.status, TaskStatus::Assigned);
        assert!(task.assigned_worker_id.is_some());
        assert_eq!(task.assigned_at_epoch_ms, Some(2000));
    }

    #[test]
    fn status_changed_to_pending_clears_assignment() {
        let id = TaskId::new();
        let mut state = MaterializedState::default();
        state.apply_event(&created_event(id));
        state.apply_event(&TaskEvent::TaskAssigned {
            id,
            worker_id: Some(memhub_core::WorkerId::new()),
            hub_id: None,
            assignment_kind: AssignmentKind::Worker,
            assigned_at_epoch_ms: 2000,
        });
        state.apply_event(&TaskEvent::TaskStatusChanged { id, status: TaskStatus::Pending, result: None, error: None, completed_at_epoch_ms: None });

        let task = &state.tasks[&id];
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assigned_worker_id.is_none());
    }

    #[test]
    fn retry_count_never_decreases_on_replay() {
        let id = TaskId::new();
        let mut state = MaterializedState::default();
        state.apply_event(&created_event(id));
        state.apply_event(&TaskEvent::TaskRetried { id, retry_count: 2 });
        state.apply_event(&TaskEvent::TaskRetried { id, retry_count: 1 });
        assert_eq!(state.tasks[&id].retry_count, 2);
    }

    #[test]
    fn hub_registered_then_removed() {
        let id = HubId::new();
        let mut state = MaterializedState::default();
        state.apply_event(&TaskEvent::HubRegistered {
            id,
            name: "downstream".into(),
            kind: HubKind::External,
            priority: 0,
            weight: 1,
            region: None,
            labels: vec![],
        });
        assert!(state.hubs.contains_key(&id));

        state.apply_event(&TaskEvent::HubRemoved { id });
        assert!(!state.hubs.contains_key(&id));
    }
}
