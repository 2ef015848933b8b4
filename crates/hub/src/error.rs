// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed errors for the Worker Hub and Federation Handler (spec §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("wire protocol error: {0}")]
    Protocol(#[from] memhub_wire::ProtocolError),

    #[error("storage failure: {0}")]
    Storage(#[from] memhub_storage::StorageError),

    #[error("worker '{0}' not found or no longer idle")]
    WorkerUnavailable(memhub_core::WorkerId),

    #[error("hub '{0}' not found or not dispatchable")]
    HubUnavailable(memhub_core::HubId),
}
