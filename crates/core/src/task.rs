// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task identifier and state machine (spec §3, §4.1).

use crate::capability::Capability;
use crate::hub::HubId;
use crate::worker::WorkerId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

crate::define_id! {
    /// Unique identifier for a task row, assigned at create.
    pub struct TaskId("tsk-");
}

/// The kind of background job a task represents (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    Observation,
    Summarize,
    Embedding,
    ContextGenerate,
    ClaudeMd,
    QdrantSync,
    SemanticSearch,
    Compression,
}

crate::simple_display! {
    TaskType {
        Observation => "observation",
        Summarize => "summarize",
        Embedding => "embedding",
        ContextGenerate => "context-generate",
        ClaudeMd => "claude-md",
        QdrantSync => "qdrant-sync",
        SemanticSearch => "semantic-search",
        Compression => "compression",
    }
}

/// Lifecycle status of a task (spec §3 invariants, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Processing,
    Completed,
    Failed,
    Timeout,
}

impl TaskStatus {
    /// Non-terminal statuses hold the deduplication key (spec §3 invariant).
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout)
    }

    pub fn is_non_terminal(&self) -> bool {
        !self.is_terminal()
    }
}

crate::simple_display! {
    TaskStatus {
        Pending => "pending",
        Assigned => "assigned",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
        Timeout => "timeout",
    }
}

/// Distinguishes a worker-bound assignment from a hub-bound (federated)
/// assignment sharing the same `assigned_worker_id` column (spec §9 open
/// question — resolved in DESIGN.md: tracked alongside rather than
/// overloading the id's type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentKind {
    Worker,
    Hub,
}

/// Configuration for creating a new task (spec §4.1 `create`).
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub task_type: TaskType,
    pub required_capability: Capability,
    pub fallback_capabilities: Vec<Capability>,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub max_retries: u32,
    pub dedup_seed: String,
}

impl TaskConfig {
    pub fn builder(task_type: TaskType, required_capability: Capability) -> TaskConfigBuilder {
        TaskConfigBuilder {
            task_type,
            required_capability,
            fallback_capabilities: Vec::new(),
            payload: serde_json::Value::Null,
            priority: 0,
            max_retries: 3,
            dedup_seed: String::new(),
        }
    }
}

pub struct TaskConfigBuilder {
    task_type: TaskType,
    required_capability: Capability,
    fallback_capabilities: Vec<Capability>,
    payload: serde_json::Value,
    priority: i32,
    max_retries: u32,
    dedup_seed: String,
}

impl TaskConfigBuilder {
    crate::setters! {
        set {
            fallback_capabilities: Vec<Capability>,
            payload: serde_json::Value,
            priority: i32,
            max_retries: u32,
        }
        into {
            dedup_seed: String,
        }
    }

    pub fn build(self) -> TaskConfig {
        TaskConfig {
            task_type: self.task_type,
            required_capability: self.required_capability,
            fallback_capabilities: self.fallback_capabilities,
            payload: self.payload,
            priority: self.priority,
            max_retries: self.max_retries,
            dedup_seed: self.dedup_seed,
        }
    }
}

/// Derive the deterministic deduplication key for a task (spec §3).
///
/// Each `TaskType` commits to one scheme so independent producers never
/// race: observation tasks key on session + prompt number + tool name +
/// a hash of tool output; claude-md tasks key on project + memory session
/// id. Other task types hash their full `dedup_seed`, which callers (the
/// Task Service) populate with the type-specific subset of payload that
/// should collapse duplicates.
pub fn dedup_key(task_type: TaskType, seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(task_type.to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(seed.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A background job record (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub required_capability: Capability,
    pub fallback_capabilities: Vec<Capability>,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub deduplication_key: String,
    pub assigned_worker_id: Option<WorkerId>,
    pub assigned_hub_id: Option<HubId>,
    pub assignment_kind: Option<AssignmentKind>,
    pub created_at_epoch_ms: u64,
    pub assigned_at_epoch_ms: Option<u64>,
    pub completed_at_epoch_ms: Option<u64>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Task {
    pub fn new(id: TaskId, config: TaskConfig, created_at_epoch_ms: u64) -> Self {
        let deduplication_key = dedup_key(config.task_type, &config.dedup_seed);
        Self {
            id,
            task_type: config.task_type,
            status: TaskStatus::Pending,
            required_capability: config.required_capability,
            fallback_capabilities: config.fallback_capabilities,
            payload: config.payload,
            priority: config.priority,
            retry_count: 0,
            max_retries: config.max_retries,
            deduplication_key,
            assigned_worker_id: None,
            assigned_hub_id: None,
            assignment_kind: None,
            created_at_epoch_ms,
            assigned_at_epoch_ms: None,
            completed_at_epoch_ms: None,
            result: None,
            error: None,
        }
    }

    /// Capabilities in resolution order: required first, then fallbacks
    /// (spec §4.5 step 4).
    pub fn capability_order(&self) -> impl Iterator<Item = &Capability> {
        std::iter::once(&self.required_capability).chain(self.fallback_capabilities.iter())
    }
}

crate::builder! {
    pub struct TaskBuilder => Task {
        set {
            task_type: TaskType = TaskType::Observation,
            status: TaskStatus = TaskStatus::Pending,
            required_capability: Capability = Capability::new("observation", "mistral"),
            fallback_capabilities: Vec<Capability> = Vec::new(),
            payload: serde_json::Value = serde_json::Value::Null,
            priority: i32 = 50,
            retry_count: u32 = 0,
            max_retries: u32 = 3,
            created_at_epoch_ms: u64 = 0,
        }
        into {
            deduplication_key: String = "test-dedup",
        }
        option {
            assigned_worker_id: WorkerId = None,
            assigned_hub_id: HubId = None,
            assignment_kind: AssignmentKind = None,
            assigned_at_epoch_ms: u64 = None,
            completed_at_epoch_ms: u64 = None,
            result: serde_json::Value = None,
            error: String = None,
        }
        computed {
            id: TaskId = TaskId::new(),
        }
    }
}
