// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate (spec §2a
//! "Configuration").

use std::path::PathBuf;
use std::time::Duration;

use crate::error::LifecycleError;

/// Resolve the state directory: `MEMHUB_STATE_DIR` > `XDG_STATE_HOME/memhub`
/// > `~/.local/state/memhub` (spec §2a).
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("MEMHUB_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("memhub"));
    }
    let home = dirs::home_dir().ok_or(LifecycleError::NoStateDir)?;
    Ok(home.join(".local/state/memhub"))
}

/// TCP port the Worker Hub listens on for local worker connections.
pub fn worker_port() -> u16 {
    std::env::var("MEMHUB_WORKER_PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(7420)
}

/// TCP port the Federation Handler listens on for downstream hub connections.
pub fn federation_port() -> u16 {
    std::env::var("MEMHUB_FEDERATION_PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(7421)
}

/// Shared auth token workers and federated hubs must present during the
/// `auth` step of the handshake. `None` disables authentication, which is
/// only sane for local development.
pub fn auth_token() -> Option<String> {
    std::env::var("MEMHUB_AUTH_TOKEN").ok().filter(|s| !s.is_empty())
}

pub fn auth_timeout() -> Duration {
    std::env::var("MEMHUB_AUTH_TIMEOUT_MS").ok().and_then(|s| s.parse::<u64>().ok()).map(Duration::from_millis).unwrap_or(Duration::from_secs(10))
}

pub fn heartbeat_interval() -> Duration {
    std::env::var("MEMHUB_HEARTBEAT_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(30))
}

pub fn max_missed_heartbeats() -> u32 {
    std::env::var("MEMHUB_MAX_MISSED_HEARTBEATS").ok().and_then(|s| s.parse().ok()).unwrap_or(3)
}

pub fn health_interval() -> Duration {
    std::env::var("MEMHUB_HEALTH_INTERVAL_MS").ok().and_then(|s| s.parse::<u64>().ok()).map(Duration::from_millis).unwrap_or(Duration::from_secs(30))
}

pub fn max_missed_reports() -> u32 {
    std::env::var("MEMHUB_MAX_MISSED_REPORTS").ok().and_then(|s| s.parse().ok()).unwrap_or(3)
}

/// `assigned`/`processing` tasks older than this are swept back to
/// `timeout` by the dispatcher (spec §4.5).
pub fn task_timeout() -> Duration {
    std::env::var("MEMHUB_TASK_TIMEOUT_MS").ok().and_then(|s| s.parse::<u64>().ok()).map(Duration::from_millis).unwrap_or(Duration::from_secs(300))
}

pub fn dispatcher_tick_interval() -> Duration {
    std::env::var("MEMHUB_DISPATCHER_TICK_MS").ok().and_then(|s| s.parse::<u64>().ok()).map(Duration::from_millis).unwrap_or(Duration::from_secs(1))
}

/// `queueX` rejects once `pending + assigned + processing` exceeds this
/// (spec §4.6 Backpressure).
pub fn max_pending_tasks() -> usize {
    std::env::var("MEMHUB_MAX_PENDING_TASKS").ok().and_then(|s| s.parse().ok()).unwrap_or(1000)
}

/// How often the hub registry's WAL is compacted to a snapshot.
pub fn compaction_interval() -> Duration {
    std::env::var("MEMHUB_COMPACTION_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(600))
}

/// Grace period the shutdown sequence waits for in-flight dispatch cycles
/// and socket drains before giving up.
pub fn drain_timeout() -> Duration {
    std::env::var("MEMHUB_DRAIN_TIMEOUT_MS").ok().and_then(|s| s.parse::<u64>().ok()).map(Duration::from_millis).unwrap_or(Duration::from_secs(5))
}
