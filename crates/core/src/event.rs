// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WAL event log for durable task-queue and hub-registry state (spec §3, §4.1).
//!
//! `TaskEvent` is the unit of record the write-ahead log persists. State is
//! derived from events, never mutated directly; every fold over a
//! `TaskEvent` must be idempotent, since the same entry may be applied both
//! at append time (for immediate in-memory visibility) and again during WAL
//! replay after a restart.

use crate::capability::Capability;
use crate::hub::{HubId, HubKind, HubStatus};
use crate::task::{AssignmentKind, TaskId, TaskStatus, TaskType};
use crate::worker::WorkerId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Durable facts about tasks and hubs (spec §3 Task, Hub; §4.1 TaskQueue
/// Repository contract).
///
/// Serializes with `{"type": "task:created", ...}`-style tagging, matching
/// the wire message tagging used elsewhere in this workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TaskEvent {
    #[serde(rename = "task:created")]
    TaskCreated {
        id: TaskId,
        task_type: TaskType,
        required_capability: Capability,
        fallback_capabilities: Vec<Capability>,
        payload: serde_json::Value,
        priority: i32,
        max_retries: u32,
        deduplication_key: String,
        created_at_epoch_ms: u64,
    },

    #[serde(rename = "task:assigned")]
    TaskAssigned {
        id: TaskId,
        worker_id: Option<WorkerId>,
        hub_id: Option<HubId>,
        assignment_kind: AssignmentKind,
        assigned_at_epoch_ms: u64,
    },

    #[serde(rename = "task:status_changed")]
    TaskStatusChanged {
        id: TaskId,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
        completed_at_epoch_ms: Option<u64>,
    },

    #[serde(rename = "task:retried")]
    TaskRetried { id: TaskId, retry_count: u32 },

    #[serde(rename = "task:cleaned_up")]
    TaskCleanedUp { ids: Vec<TaskId> },

    #[serde(rename = "hub:registered")]
    HubRegistered {
        id: HubId,
        name: String,
        kind: HubKind,
        priority: i32,
        weight: u32,
        region: Option<String>,
        labels: Vec<String>,
    },

    #[serde(rename = "hub:health_reported")]
    HubHealthReported {
        id: HubId,
        connected_workers: u32,
        active_workers: u32,
        avg_latency_ms: f64,
        capabilities: HashSet<Capability>,
        reported_at_epoch_ms: u64,
    },

    #[serde(rename = "hub:status_changed")]
    HubStatusChanged { id: HubId, status: HubStatus },

    #[serde(rename = "hub:removed")]
    HubRemoved { id: HubId },
}

impl TaskEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::TaskCreated { .. } => "task:created",
            TaskEvent::TaskAssigned { .. } => "task:assigned",
            TaskEvent::TaskStatusChanged { .. } => "task:status_changed",
            TaskEvent::TaskRetried { .. } => "task:retried",
            TaskEvent::TaskCleanedUp { .. } => "task:cleaned_up",
            TaskEvent::HubRegistered { .. } => "hub:registered",
            TaskEvent::HubHealthReported { .. } => "hub:health_reported",
            TaskEvent::HubStatusChanged { .. } => "hub:status_changed",
            TaskEvent::HubRemoved { .. } => "hub:removed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let event = TaskEvent::TaskRetried { id: TaskId::new(), retry_count: 2 };
        let json = serde_json::to_string(&event).unwrap();
        let back: TaskEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn name_matches_serde_tag() {
        let event = TaskEvent::TaskCleanedUp { ids: vec![] };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.name());
    }
}
