// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol for worker <-> hub and hub <-> backend (federation) traffic.
//!
//! Wire format: JSON objects, one per WebSocket text frame, tagged on a
//! `type` field (spec §6 "Wire protocol").

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod close;
mod federation;
mod framing;
mod worker;

pub use close::CloseCode;
pub use federation::{BackendToHubMessage, HubToBackendMessage};
pub use framing::{decode, encode, ProtocolError};
pub use worker::{HubToWorkerMessage, TaskEnvelope, WorkerToHubMessage};
