//! Notifications adapter.
//!
//! Incoming `NOTIFICATION` envelopes land in a bounded inbox, newest first.
//! Anything above low priority is also raised through an [`AlertSink`];
//! normal-priority alerts are dismissed automatically after a short delay,
//! higher ones stay until read.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tether_client::{Scheduler, SessionHandle, Subscription, TaskGroup, TaskHandle};
use tether_core::{Envelope, MessageType, Payload};
use tracing::{debug, info};

/// Label of alert auto-dismiss tasks.
pub const DISMISS_LABEL: &str = "notifications.dismiss";

/// Notification priority.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Inbox only, no alert.
    Low,
    /// Alert, dismissed automatically.
    #[default]
    Normal,
    /// Alert until read.
    High,
}

impl Priority {
    /// Parse a wire value. Unknown or missing values are `Normal`.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::to_ascii_lowercase).as_deref() {
            Some("low") => Self::Low,
            Some("high" | "urgent") => Self::High,
            _ => Self::Normal,
        }
    }
}

/// One notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Notification ID (`id` from the payload, else the envelope ID).
    pub id: String,
    /// Alert title.
    pub title: String,
    /// Alert body.
    pub body: String,
    /// Priority.
    pub priority: Priority,
    /// Whether the user has seen it.
    pub read: bool,
    /// Envelope timestamp.
    pub received_at: DateTime<Utc>,
    /// Full payload as received.
    pub data: Payload,
}

impl Notification {
    /// Read a `NOTIFICATION` envelope.
    pub fn from_envelope(envelope: &Envelope) -> Self {
        Self {
            id: envelope
                .payload_str("id")
                .map_or_else(|| envelope.id.to_string(), str::to_string),
            title: envelope.payload_str("title").unwrap_or_default().to_string(),
            body: envelope
                .payload_str("body")
                .or_else(|| envelope.payload_str("message"))
                .unwrap_or_default()
                .to_string(),
            priority: Priority::parse(envelope.payload_str("priority")),
            read: false,
            received_at: envelope.timestamp,
            data: envelope.payload.clone(),
        }
    }
}

/// Where alerts are shown.
pub trait AlertSink: Send + Sync + 'static {
    /// Raise an alert.
    fn show(&self, notification: &Notification);
    /// Take a raised alert down.
    fn dismiss(&self, notification_id: &str);
}

/// Sink that only logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn show(&self, notification: &Notification) {
        info!(
            id = %notification.id,
            priority = ?notification.priority,
            title = %notification.title,
            "{}",
            notification.body
        );
    }

    fn dismiss(&self, notification_id: &str) {
        debug!(id = notification_id, "alert dismissed");
    }
}

struct Inbox {
    limit: usize,
    dismiss_after: Duration,
    items: VecDeque<Notification>,
    // counts unread notifications already evicted from `items` too
    unread: usize,
    // raised alerts; `Some` while an auto-dismiss is scheduled
    alerts: HashMap<String, Option<TaskHandle>>,
}

impl std::fmt::Debug for Inbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbox")
            .field("limit", &self.limit)
            .field("items", &self.items.len())
            .field("unread", &self.unread)
            .field("alerts", &self.alerts.len())
            .finish_non_exhaustive()
    }
}

impl Inbox {
    fn push(&mut self, notification: Notification) -> Vec<Notification> {
        if !notification.read {
            self.unread += 1;
        }
        self.items.push_front(notification);
        let mut evicted = Vec::new();
        while self.items.len() > self.limit {
            if let Some(old) = self.items.pop_back() {
                evicted.push(old);
            }
        }
        evicted
    }

    /// Mark `id` read. Returns `false` if it is not in the inbox.
    fn mark_read(&mut self, id: &str) -> bool {
        match self.items.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                if !n.read {
                    n.read = true;
                    self.unread = self.unread.saturating_sub(1);
                }
                true
            }
            None => false,
        }
    }

    fn mark_all_read(&mut self) {
        self.items.iter_mut().for_each(|n| n.read = true);
        self.unread = 0;
    }

    /// Forget an alert, cancelling its auto-dismiss. Returns whether it was raised.
    fn take_alert(&mut self, id: &str) -> bool {
        match self.alerts.remove(id) {
            Some(timer) => {
                if let Some(timer) = timer {
                    let _ = timer.cancel();
                }
                true
            }
            None => false,
        }
    }
}

struct Shared {
    inbox: Mutex<Inbox>,
    sink: Arc<dyn AlertSink>,
    scheduler: Arc<Scheduler>,
}

impl Shared {
    fn receive(self: &Arc<Self>, notification: Notification) {
        debug!(id = %notification.id, priority = ?notification.priority, "notification received");
        let mut dismissed = Vec::new();
        let alert = notification.priority > Priority::Low;
        let raised = alert.then(|| notification.clone());
        {
            let mut inbox = self.inbox.lock();
            for old in inbox.push(notification) {
                if inbox.take_alert(&old.id) {
                    dismissed.push(old.id);
                }
            }
            if let Some(n) = &raised {
                let after = inbox.dismiss_after;
                let timer =
                    (n.priority == Priority::Normal).then(|| self.schedule_dismiss(&n.id, after));
                if let Some(Some(previous)) = inbox.alerts.insert(n.id.clone(), timer) {
                    let _ = previous.cancel();
                }
            }
        }
        for id in dismissed {
            self.sink.dismiss(&id);
        }
        if let Some(n) = raised {
            self.sink.show(&n);
        }
    }

    fn schedule_dismiss(self: &Arc<Self>, id: &str, after: Duration) -> TaskHandle {
        let weak = Arc::downgrade(self);
        let id = id.to_string();
        self.scheduler
            .schedule(TaskGroup::Feature, DISMISS_LABEL, after, move || {
                if let Some(shared) = weak.upgrade() {
                    // the timer is already spent; just forget the alert
                    let raised = shared.inbox.lock().alerts.remove(&id).is_some();
                    if raised {
                        shared.sink.dismiss(&id);
                    }
                }
            })
    }

    fn dismiss(&self, ids: Vec<String>) {
        let dismissed: Vec<String> = {
            let mut inbox = self.inbox.lock();
            ids.into_iter().filter(|id| inbox.take_alert(id)).collect()
        };
        for id in dismissed {
            self.sink.dismiss(&id);
        }
    }
}

/// Notification inbox derived from the session.
pub struct NotificationsAdapter {
    shared: Arc<Shared>,
    _subscription: Subscription,
}

impl std::fmt::Debug for NotificationsAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationsAdapter")
            .field("inbox", &*self.shared.inbox.lock())
            .finish_non_exhaustive()
    }
}

impl NotificationsAdapter {
    /// Subscribe to notifications on `session`, raising alerts on `sink`.
    pub fn new(session: &SessionHandle, sink: Arc<dyn AlertSink>) -> Self {
        let features = &session.settings().features;
        let shared = Arc::new(Shared {
            inbox: Mutex::new(Inbox {
                limit: features.notification_limit.max(1),
                dismiss_after: features.notification_dismiss(),
                items: VecDeque::new(),
                unread: 0,
                alerts: HashMap::new(),
            }),
            sink,
            scheduler: Arc::clone(session.scheduler()),
        });

        let handler = Arc::downgrade(&shared);
        let subscription = session.subscribe(MessageType::Notification, move |env| {
            if let Some(shared) = handler.upgrade() {
                shared.receive(Notification::from_envelope(env));
            }
        });

        Self {
            shared,
            _subscription: subscription,
        }
    }

    /// Inbox contents, newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.shared.inbox.lock().items.iter().cloned().collect()
    }

    /// Number of unread notifications, including unread ones that have
    /// already fallen out of the bounded inbox.
    pub fn unread_count(&self) -> usize {
        self.shared.inbox.lock().unread
    }

    /// Mark one notification read, dismissing its alert. Returns `false` if
    /// it is not in the inbox.
    pub fn mark_read(&self, id: &str) -> bool {
        let found = self.shared.inbox.lock().mark_read(id);
        if found {
            self.shared.dismiss(vec![id.to_string()]);
        }
        found
    }

    /// Mark everything read and dismiss every alert.
    pub fn mark_all_read(&self) {
        let ids: Vec<String> = {
            let mut inbox = self.shared.inbox.lock();
            inbox.mark_all_read();
            inbox.alerts.keys().cloned().collect()
        };
        self.shared.dismiss(ids);
    }

    /// Empty the inbox and dismiss every alert.
    pub fn clear(&self) {
        let ids: Vec<String> = {
            let mut inbox = self.shared.inbox.lock();
            inbox.items.clear();
            inbox.unread = 0;
            inbox.alerts.keys().cloned().collect()
        };
        self.shared.dismiss(ids);
    }
}

impl Drop for NotificationsAdapter {
    fn drop(&mut self) {
        let mut inbox = self.shared.inbox.lock();
        for timer in inbox.alerts.drain().filter_map(|(_, timer)| timer) {
            let _ = timer.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn priority_parsing() {
        assert_eq!(Priority::parse(Some("low")), Priority::Low);
        assert_eq!(Priority::parse(Some("HIGH")), Priority::High);
        assert_eq!(Priority::parse(Some("urgent")), Priority::High);
        assert_eq!(Priority::parse(Some("whatever")), Priority::Normal);
        assert_eq!(Priority::parse(None), Priority::Normal);
    }

    #[test]
    fn notification_reads_payload() {
        let payload = tether_core::protocol::payload_from(json!({
            "id": "n-1",
            "title": "New match",
            "message": "Someone liked you",
            "priority": "high",
        }))
        .unwrap();
        let n = Notification::from_envelope(&Envelope::new(MessageType::Notification, payload));
        assert_eq!(n.id, "n-1");
        assert_eq!(n.body, "Someone liked you");
        assert_eq!(n.priority, Priority::High);
        assert!(!n.read);
    }

    #[test]
    fn inbox_evicts_oldest() {
        let mut inbox = Inbox {
            limit: 2,
            dismiss_after: Duration::from_secs(5),
            items: VecDeque::new(),
            unread: 0,
            alerts: HashMap::new(),
        };
        let make = |id: &str| Notification {
            id: id.into(),
            title: String::new(),
            body: String::new(),
            priority: Priority::Low,
            read: false,
            received_at: Utc::now(),
            data: Payload::new(),
        };
        assert!(inbox.push(make("a")).is_empty());
        assert!(inbox.push(make("b")).is_empty());
        let evicted = inbox.push(make("c"));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, "a");
        assert_eq!(inbox.unread, 3);

        assert!(inbox.mark_read("b"));
        assert!(inbox.mark_read("b"));
        assert!(!inbox.mark_read("a"));
        assert_eq!(inbox.unread, 2);

        inbox.mark_all_read();
        assert_eq!(inbox.unread, 0);
    }
}
