// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed errors for the Event Bus (spec §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("client '{0}' is not subscribed")]
    NotSubscribed(String),

    #[error("client type does not have permission to publish")]
    PublishNotPermitted,
}
