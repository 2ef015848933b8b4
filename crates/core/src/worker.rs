// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker identifier and in-memory worker record.
//!
//! Workers are never persisted (see spec §3): a reconnecting worker
//! re-registers and is assigned a fresh [`WorkerId`].

use crate::capability::Capability;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;

crate::define_id! {
    /// Hub-assigned identifier for a connected worker process.
    pub struct WorkerId("wkr-");
}

/// Provenance metadata a worker reports at registration time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerMetadata {
    pub version: Option<String>,
    pub hostname: Option<String>,
    /// Links this connection to a process-supervisor spawn record, if any.
    pub spawn_id: Option<String>,
}

/// An in-memory record of a connected, registered worker.
#[derive(Debug, Clone)]
pub struct Worker {
    pub id: WorkerId,
    pub capabilities: HashSet<Capability>,
    pub metadata: WorkerMetadata,
    pub connected_at: Instant,
    pub last_heartbeat: Instant,
    pub current_task_id: Option<crate::task::TaskId>,
    pub authenticated: bool,
}

impl Worker {
    pub fn new(id: WorkerId, capabilities: HashSet<Capability>, metadata: WorkerMetadata, now: Instant) -> Self {
        Self {
            id,
            capabilities,
            metadata,
            connected_at: now,
            last_heartbeat: now,
            current_task_id: None,
            authenticated: true,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.current_task_id.is_none()
    }

    pub fn has_capability(&self, cap: &Capability) -> bool {
        self.capabilities.contains(cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_worker_is_idle() {
        let w = Worker::new(WorkerId::new(), HashSet::new(), WorkerMetadata::default(), Instant::now());
        assert!(w.is_idle());
    }

    #[test]
    fn has_capability_checks_membership() {
        let mut caps = HashSet::new();
        caps.insert(Capability::new("observation", "mistral"));
        let w = Worker::new(WorkerId::new(), caps, WorkerMetadata::default(), Instant::now());
        assert!(w.has_capability(&Capability::new("observation", "mistral")));
        assert!(!w.has_capability(&Capability::new("observation", "gemini")));
    }
}
