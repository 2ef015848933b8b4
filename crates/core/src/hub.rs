// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable hub records for federation (spec §3, §4.4, §4.5).

use crate::capability::Capability;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

crate::define_id! {
    /// Identifier for a hub entry in the Hub Registry.
    pub struct HubId("hub-");
}

/// Whether a hub is the backend's own local worker pool or an external,
/// federated pool exposed by a downstream hub over the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HubKind {
    Local,
    External,
}

crate::simple_display! {
    HubKind {
        Local => "local",
        External => "external",
    }
}

/// Health classification for a federated hub, driven by `hub:health` reports
/// (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HubStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Offline,
}

impl HubStatus {
    /// Hubs in this state are eligible destinations for dispatch (spec §4.5 step 2).
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, HubStatus::Healthy | HubStatus::Degraded)
    }
}

crate::simple_display! {
    HubStatus {
        Healthy => "healthy",
        Degraded => "degraded",
        Unhealthy => "unhealthy",
        Offline => "offline",
    }
}

/// A durable record of a known external hub, with routing-policy metadata
/// (spec §3 Hub, §4.5 Hub Registry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hub {
    pub id: HubId,
    pub name: String,
    pub kind: HubKind,
    pub priority: i32,
    pub weight: u32,
    pub region: Option<String>,
    pub labels: Vec<String>,
    pub status: HubStatus,
    pub connected_workers: u32,
    pub active_workers: u32,
    pub avg_latency_ms: f64,
    pub capabilities: HashSet<Capability>,
    pub last_health_report_epoch_ms: Option<u64>,
}

impl Hub {
    pub fn new(name: impl Into<String>, kind: HubKind) -> Self {
        Self {
            id: HubId::new(),
            name: name.into(),
            kind,
            priority: 0,
            weight: 1,
            region: None,
            labels: Vec::new(),
            status: HubStatus::Healthy,
            connected_workers: 0,
            active_workers: 0,
            avg_latency_ms: 0.0,
            capabilities: HashSet::new(),
            last_health_report_epoch_ms: None,
        }
    }

    /// Current load as a fraction of connected capacity, used to break
    /// priority ties among federated hubs (spec §4.5 step 4).
    pub fn load_fraction(&self) -> f64 {
        if self.connected_workers == 0 {
            return 1.0;
        }
        self.active_workers as f64 / self.connected_workers as f64
    }
}

crate::builder! {
    pub struct HubBuilder => Hub {
        into {
            name: String = "test-hub",
        }
        set {
            kind: HubKind = HubKind::External,
            priority: i32 = 0,
            weight: u32 = 1,
            labels: Vec<String> = Vec::new(),
            status: HubStatus = HubStatus::Healthy,
            connected_workers: u32 = 0,
            active_workers: u32 = 0,
            avg_latency_ms: f64 = 0.0,
            capabilities: std::collections::HashSet<Capability> = std::collections::HashSet::new(),
        }
        option {
            region: String = None,
            last_health_report_epoch_ms: u64 = None,
        }
        computed {
            id: HubId = HubId::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_and_degraded_are_dispatchable() {
        assert!(HubStatus::Healthy.is_dispatchable());
        assert!(HubStatus::Degraded.is_dispatchable());
        assert!(!HubStatus::Unhealthy.is_dispatchable());
        assert!(!HubStatus::Offline.is_dispatchable());
    }

    #[test]
    fn load_fraction_with_no_workers_is_saturated() {
        let hub = Hub::new("downstream", HubKind::External);
        assert_eq!(hub.load_fraction(), 1.0);
    }

    #[test]
    fn load_fraction_reflects_active_over_connected() {
        let mut hub = Hub::new("downstream", HubKind::External);
        hub.connected_workers = 4;
        hub.active_workers = 1;
        assert_eq!(hub.load_fraction(), 0.25);
    }
}
