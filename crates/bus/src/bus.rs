// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory topic pub/sub with wildcard patterns (spec §4.2).
//!
//! The bus is a purely ephemeral fan-out of notifications about task and
//! worker lifecycle; it is independent of the durable WAL in
//! `memhub-storage`, which records the underlying facts. Losing queued
//! events here on overflow or restart has no bearing on queue correctness.

use crate::error::BusError;
use crate::mailbox::{Envelope, Mailbox};
use memhub_core::{ChannelPattern, ClientType, Subscription};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Default bound on a subscriber's undelivered-event queue.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

struct Entry {
    subscription: Subscription,
    mailbox: Arc<Mailbox>,
}

/// Channel router: subscribe, unsubscribe, publish (spec §4.2 contract).
pub struct EventBus {
    entries: Mutex<HashMap<String, Entry>>,
    mailbox_capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_mailbox_capacity(DEFAULT_MAILBOX_CAPACITY)
    }

    pub fn with_mailbox_capacity(mailbox_capacity: usize) -> Self {
        Self { entries: Mutex::new(HashMap::new()), mailbox_capacity }
    }

    /// Register (or replace) a client's subscription, returning its mailbox.
    pub fn subscribe(&self, client_id: impl Into<String>, client_type: ClientType, patterns: &[String], permissions: HashSet<String>) -> Arc<Mailbox> {
        let client_id = client_id.into();
        let subscription = Subscription::new(client_id.clone(), client_type, patterns, permissions);
        let mailbox = Arc::new(Mailbox::new(self.mailbox_capacity));
        self.entries.lock().insert(client_id, Entry { subscription, mailbox: mailbox.clone() });
        mailbox
    }

    /// Drop a client's subscription entirely, or narrow it to no longer
    /// match `patterns` if given.
    pub fn unsubscribe(&self, client_id: &str, patterns: Option<&[String]>) {
        let mut entries = self.entries.lock();
        let Some(patterns) = patterns else {
            entries.remove(client_id);
            return;
        };
        if let Some(entry) = entries.get_mut(client_id) {
            let to_remove: Vec<ChannelPattern> = patterns.iter().map(|p| ChannelPattern::parse(p)).collect();
            entry.subscription.patterns.retain(|p| !to_remove.contains(p));
            if entry.subscription.patterns.is_empty() {
                entries.remove(client_id);
            }
        }
    }

    /// Synchronously fan out `payload` on `channel` to every subscriber
    /// whose pattern set matches it. Always permitted: callers within the
    /// process (dispatcher, hub, federation handler) are trusted; external
    /// publish requests should go through [`EventBus::publish_as`].
    pub fn publish(&self, channel: &str, payload: serde_json::Value) {
        let entries = self.entries.lock();
        for entry in entries.values() {
            if entry.subscription.matches(channel) {
                entry.mailbox.push(Envelope { channel: channel.to_string(), payload: payload.clone() });
            }
        }
    }

    /// Publish gated by the publishing client's permissions (spec §4.2:
    /// "worker: also broadcast"; other client types are subscribe-only).
    pub fn publish_as(&self, client_id: &str, channel: &str, payload: serde_json::Value) -> Result<(), BusError> {
        let entries = self.entries.lock();
        let entry = entries.get(client_id).ok_or_else(|| BusError::NotSubscribed(client_id.to_string()))?;
        if !entry.subscription.client_type.may_publish() && !entry.subscription.permissions.contains("publish") {
            return Err(BusError::PublishNotPermitted);
        }
        for other in entries.values() {
            if other.subscription.matches(channel) {
                other.mailbox.push(Envelope { channel: channel.to_string(), payload: payload.clone() });
            }
        }
        Ok(())
    }

    pub fn subscriber_count(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
