// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscription records and channel pattern matching for the Event Bus (spec §4.2).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Kind of client holding a subscription, which gates permitted operations
/// (spec §4.2: browser is subscribe-only, worker may also broadcast,
/// sse-writer is subscribe-only scoped to its own session channels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientType {
    Browser,
    Worker,
    SseWriter,
}

impl ClientType {
    pub fn may_publish(&self) -> bool {
        matches!(self, ClientType::Worker)
    }
}

/// A single compiled channel pattern: literal, `prefix:*`, or `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelPattern {
    Literal(String),
    Prefix(String),
    Any,
}

impl ChannelPattern {
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            ChannelPattern::Any
        } else if let Some(prefix) = pattern.strip_suffix(":*") {
            ChannelPattern::Prefix(prefix.to_string())
        } else {
            ChannelPattern::Literal(pattern.to_string())
        }
    }

    pub fn matches(&self, channel: &str) -> bool {
        match self {
            ChannelPattern::Any => true,
            ChannelPattern::Literal(lit) => lit == channel,
            ChannelPattern::Prefix(prefix) => {
                channel.strip_prefix(prefix.as_str()).and_then(|rest| rest.strip_prefix(':')).is_some()
            }
        }
    }
}

/// A client's registration with the Event Bus.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub client_id: String,
    pub client_type: ClientType,
    pub permissions: HashSet<String>,
    pub patterns: Vec<ChannelPattern>,
}

impl Subscription {
    pub fn new(client_id: impl Into<String>, client_type: ClientType, patterns: &[String], permissions: HashSet<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_type,
            permissions,
            patterns: patterns.iter().map(|p| ChannelPattern::parse(p)).collect(),
        }
    }

    pub fn matches(&self, channel: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(channel))
    }
}
