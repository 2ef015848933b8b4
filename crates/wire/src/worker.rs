// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker <-> Hub message set (spec §4.3).

use memhub_core::{Capability, TaskId, TaskType, WorkerId};
use serde::{Deserialize, Serialize};

/// The task payload a worker receives inside `task:assign` — deliberately
/// narrower than the full [`memhub_core::Task`] row: workers only ever see
/// `{id, type, payload}` plus the resolved capability (spec §4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub payload: serde_json::Value,
}

/// Messages a worker process sends to the hub it is connected to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerToHubMessage {
    #[serde(rename = "auth")]
    Auth { token: String },

    #[serde(rename = "register")]
    Register { capabilities: Vec<Capability>, metadata: serde_json::Value },

    #[serde(rename = "heartbeat")]
    Heartbeat { worker_id: String },

    #[serde(rename = "task:complete")]
    TaskComplete {
        worker_id: String,
        task_id: TaskId,
        result: serde_json::Value,
        processing_time_ms: u64,
    },

    #[serde(rename = "task:error")]
    TaskError { worker_id: String, task_id: TaskId, error: String, retryable: bool },

    #[serde(rename = "task:progress")]
    TaskProgress {
        worker_id: String,
        task_id: TaskId,
        progress: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    #[serde(rename = "shutdown")]
    Shutdown {
        worker_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Messages the hub sends to a connected worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HubToWorkerMessage {
    #[serde(rename = "connection:pending")]
    ConnectionPending,

    #[serde(rename = "auth:success")]
    AuthSuccess,

    #[serde(rename = "auth:failed")]
    AuthFailed { reason: String },

    #[serde(rename = "registered")]
    Registered { worker_id: WorkerId },

    #[serde(rename = "heartbeat:ack")]
    HeartbeatAck,

    #[serde(rename = "task:assign")]
    TaskAssign { task: TaskEnvelope, capability: Capability },

    #[serde(rename = "task:cancel")]
    TaskCancel {
        task_id: TaskId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "server:shutdown")]
    ServerShutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_assign_serializes_with_tag() {
        let msg = HubToWorkerMessage::TaskAssign {
            task: TaskEnvelope { id: TaskId::new(), task_type: TaskType::Observation, payload: serde_json::json!({}) },
            capability: Capability::new("observation", "mistral"),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "task:assign");
        assert_eq!(value["capability"], "observation:mistral");
    }

    #[test]
    fn register_round_trips() {
        let msg = WorkerToHubMessage::Register {
            capabilities: vec![Capability::new("observation", "mistral")],
            metadata: serde_json::json!({"version": "1.0"}),
        };
        let text = serde_json::to_string(&msg).unwrap();
        let back: WorkerToHubMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(msg, back);
    }
}
