//! Outbound queue for messages sent while not connected.
//!
//! Strict FIFO, never reordered or deduplicated. Bounded by `maxQueued`;
//! what happens at the bound is the configured [`OverflowPolicy`].

use std::collections::VecDeque;

use tether_core::Envelope;
use tether_settings::{OverflowPolicy, QueueSettings};

use crate::pending::{Responder, SendOptions};

/// A message waiting for the connection to authenticate.
#[derive(Debug)]
pub struct QueueEntry {
    /// The envelope, already stamped with its ID.
    pub envelope: Envelope,
    /// Options it was sent with.
    pub options: SendOptions,
    /// Waiter for the response, when one is expected.
    pub responder: Option<Responder>,
}

/// Result of [`OutboundQueue::push`].
#[derive(Debug)]
pub enum PushOutcome {
    /// Appended.
    Queued,
    /// Appended after evicting the returned oldest entry.
    Evicted(QueueEntry),
    /// Not appended; the entry is handed back.
    Rejected(QueueEntry),
}

/// Bounded FIFO of outbound messages.
#[derive(Debug)]
pub struct OutboundQueue {
    entries: VecDeque<QueueEntry>,
    max_queued: usize,
    policy: OverflowPolicy,
}

impl OutboundQueue {
    /// Create an empty queue.
    pub fn new(settings: &QueueSettings) -> Self {
        Self {
            entries: VecDeque::new(),
            max_queued: settings.max_queued.max(1),
            policy: settings.overflow,
        }
    }

    /// Append an entry, applying the overflow policy when full.
    pub fn push(&mut self, entry: QueueEntry) -> PushOutcome {
        if self.entries.len() < self.max_queued {
            self.entries.push_back(entry);
            return PushOutcome::Queued;
        }
        match self.policy {
            OverflowPolicy::RejectNew => PushOutcome::Rejected(entry),
            OverflowPolicy::DropOldest => {
                let evicted = self.entries.pop_front();
                self.entries.push_back(entry);
                match evicted {
                    Some(old) => PushOutcome::Evicted(old),
                    None => PushOutcome::Queued,
                }
            }
        }
    }

    /// Take every entry in enqueue order.
    pub fn drain(&mut self) -> Vec<QueueEntry> {
        self.entries.drain(..).collect()
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured bound.
    pub fn capacity(&self) -> usize {
        self.max_queued
    }
}
