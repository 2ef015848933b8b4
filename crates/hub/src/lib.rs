// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! memhub-hub: Worker Hub and Federation Handler (spec §4.3, §4.4).
//!
//! Both connection managers speak a JSON-over-WebSocket protocol
//! ([`memhub_wire`]) and implement [`memhub_core::TransportSender`] for
//! their respective [`memhub_core::Destination`] variant, so the Task
//! Dispatcher never holds a concrete reference to either.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod error;
mod federation;
mod worker_hub;

pub use error::HubError;
pub use federation::{FederationConfig, FederationHandler};
pub use worker_hub::{HubConfig, WorkerHub};
