//! # tether-features
//!
//! Feature adapters built on a [`SessionHandle`]. Each adapter subscribes to
//! the message types of its domain, keeps derived state behind a lock, and
//! sends through the session. Dropping an adapter removes its handlers and
//! cancels its timers.
//!
//! - [`chat`]: typing indicators and per-message delivery status
//! - [`matching`]: recent matches, reveal requests and outcomes
//! - [`presence`]: online users and local idle detection
//! - [`notifications`]: bounded inbox with OS-style alerts

#![deny(unsafe_code)]

pub mod chat;
pub mod matching;
pub mod notifications;
pub mod presence;

use std::sync::Arc;

pub use chat::{ChatAdapter, ChatMessage, DeliveryStatus};
pub use matching::{MatchEvent, MatchingAdapter, RevealOutcome};
pub use notifications::{AlertSink, Notification, NotificationsAdapter, Priority, TracingAlertSink};
pub use presence::{ActivityStatus, PresenceAdapter};
use tether_client::SessionHandle;

/// All four adapters attached to one session.
#[derive(Debug)]
pub struct Features {
    /// Chat adapter.
    pub chat: ChatAdapter,
    /// Matching adapter.
    pub matching: MatchingAdapter,
    /// Presence adapter.
    pub presence: PresenceAdapter,
    /// Notifications adapter.
    pub notifications: NotificationsAdapter,
}

impl Features {
    /// Attach every adapter, with alerts going to `sink`.
    pub fn attach(session: &SessionHandle, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            chat: ChatAdapter::new(session),
            matching: MatchingAdapter::new(session),
            presence: PresenceAdapter::new(session),
            notifications: NotificationsAdapter::new(session, sink),
        }
    }
}
