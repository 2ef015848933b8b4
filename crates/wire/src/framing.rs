// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON encode/decode helpers shared by both message sets.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encode a message to a JSON text frame.
pub fn encode<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(ProtocolError::Encode)
}

/// Decode a JSON text frame into a message.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerToHubMessage;

    #[test]
    fn encode_then_decode_round_trips() {
        let msg = WorkerToHubMessage::Heartbeat { worker_id: "wkr-1".into() };
        let text = encode(&msg).unwrap();
        let back: WorkerToHubMessage = decode(&text).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let result: Result<WorkerToHubMessage, _> = decode("not json");
        assert!(result.is_err());
    }
}
