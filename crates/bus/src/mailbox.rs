// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-subscriber bounded mailbox with drop-oldest overflow (spec §4.2
//! Backpressure: "per-subscriber bounded queue; on overflow, drop oldest
//! and record a metric. This is NOT a reliable delivery bus.").

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// A single published event, ready for delivery to one subscriber.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub channel: String,
    pub payload: serde_json::Value,
}

/// Bounded, FIFO, drop-oldest-on-overflow queue for one subscriber.
///
/// Publishes into a single mailbox are strictly ordered (spec: "Delivery
/// order per subscriber: FIFO with publishes from the same goroutine");
/// overflowing publishers never block, they displace the oldest entry.
pub struct Mailbox {
    capacity: usize,
    queue: Mutex<VecDeque<Envelope>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl Mailbox {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), queue: Mutex::new(VecDeque::new()), notify: Notify::new(), dropped: AtomicU64::new(0) }
    }

    /// Push an envelope, dropping the oldest queued entry if at capacity.
    pub fn push(&self, envelope: Envelope) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(channel = %envelope.channel, "subscriber mailbox full, dropped oldest event");
        }
        queue.push_back(envelope);
        drop(queue);
        self.notify.notify_one();
    }

    /// Pop the next envelope without blocking, if any is queued.
    pub fn try_pop(&self) -> Option<Envelope> {
        self.queue.lock().pop_front()
    }

    /// Wait until an envelope is available, then pop it.
    pub async fn recv(&self) -> Envelope {
        loop {
            if let Some(envelope) = self.try_pop() {
                return envelope;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count of envelopes dropped for overflow since mailbox creation (the
    /// backpressure metric the spec requires be recorded).
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
