// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hub <-> Backend (federation) message set (spec §4.4).
//!
//! Mirrors the worker/hub message set with `hub:` prefixes; a downstream
//! hub plays the role a worker plays in §4.3, representing a whole pool
//! rather than a single process.

use crate::worker::TaskEnvelope;
use memhub_core::{Capability, HubId, TaskId};
use serde::{Deserialize, Serialize};

/// Messages a downstream hub sends to the parent backend's Federation Handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BackendToHubMessage {
    #[serde(rename = "hub:auth")]
    Auth { token: String },

    #[serde(rename = "hub:register")]
    Register { name: String, capabilities: Vec<Capability>, metadata: serde_json::Value },

    #[serde(rename = "hub:health")]
    Health { connected_workers: u32, active_workers: u32, avg_latency_ms: f64, capabilities: Vec<Capability> },

    #[serde(rename = "hub:task:complete")]
    TaskComplete { hub_id: HubId, task_id: TaskId, result: serde_json::Value, processing_time_ms: u64 },

    #[serde(rename = "hub:task:error")]
    TaskError { hub_id: HubId, task_id: TaskId, error: String, retryable: bool },

    #[serde(rename = "hub:task:progress")]
    TaskProgress {
        hub_id: HubId,
        task_id: TaskId,
        progress: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    #[serde(rename = "hub:shutdown")]
    Shutdown {
        hub_id: HubId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Messages the parent backend sends to a connected downstream hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HubToBackendMessage {
    #[serde(rename = "hub:connection:pending")]
    ConnectionPending,

    #[serde(rename = "hub:auth:success")]
    AuthSuccess,

    #[serde(rename = "hub:auth:failed")]
    AuthFailed { reason: String },

    #[serde(rename = "hub:registered")]
    Registered { hub_id: HubId },

    #[serde(rename = "hub:health:ack")]
    HealthAck,

    #[serde(rename = "hub:task:assign")]
    TaskAssign { task: TaskEnvelope, capability: Capability },

    #[serde(rename = "hub:task:cancel")]
    TaskCancel {
        task_id: TaskId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "hub:server:shutdown")]
    ServerShutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_report_round_trips() {
        let msg = BackendToHubMessage::Health {
            connected_workers: 3,
            active_workers: 1,
            avg_latency_ms: 12.5,
            capabilities: vec![Capability::new("observation", "gemini")],
        };
        let text = serde_json::to_string(&msg).unwrap();
        let back: BackendToHubMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(msg, back);
    }
}
