//! Inbound message routing.
//!
//! One handler per [`MessageType`]; the last registration wins. Every inbound
//! envelope is recorded in a bounded history. Non-system envelopes are also
//! published on a session-scoped broadcast channel for consumers that did
//! not subscribe to a specific type.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tether_core::{Envelope, MessageType};
use tether_settings::RouterSettings;
use tokio::sync::broadcast;
use tracing::trace;

/// Per-type handler. Runs on the session loop and must not block.
pub type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

struct Registration {
    token: u64,
    handler: Handler,
}

/// Subscription table, history, and broadcast channel for one session.
pub struct Router {
    table: RwLock<HashMap<MessageType, Registration>>,
    next_token: AtomicU64,
    history: Mutex<VecDeque<Arc<Envelope>>>,
    history_limit: usize,
    last_message: RwLock<Option<Arc<Envelope>>>,
    events: broadcast::Sender<Arc<Envelope>>,
}

impl Router {
    /// Create an empty router.
    pub fn new(settings: &RouterSettings) -> Arc<Self> {
        let (events, _) = broadcast::channel(settings.broadcast_capacity.max(1));
        Arc::new(Self {
            table: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            history: Mutex::new(VecDeque::with_capacity(settings.history_limit)),
            history_limit: settings.history_limit,
            last_message: RwLock::new(None),
            events,
        })
    }

    /// Register `handler` for `message_type`, replacing any previous one.
    pub fn subscribe<F>(self: &Arc<Self>, message_type: MessageType, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let replaced = self.table.write().insert(
            message_type,
            Registration {
                token,
                handler: Arc::new(handler),
            },
        );
        if replaced.is_some() {
            trace!(%message_type, "subscription replaced");
        }
        Subscription {
            router: Arc::downgrade(self),
            message_type,
            token,
            active: true,
        }
    }

    /// Whether a handler is registered for `message_type`.
    pub fn has_subscriber(&self, message_type: MessageType) -> bool {
        self.table.read().contains_key(&message_type)
    }

    /// Number of registered handlers.
    pub fn subscriber_count(&self) -> usize {
        self.table.read().len()
    }

    /// Append to history and update the last message.
    pub fn record(&self, envelope: &Arc<Envelope>) {
        {
            let mut history = self.history.lock();
            history.push_back(Arc::clone(envelope));
            while history.len() > self.history_limit {
                let _ = history.pop_front();
            }
        }
        *self.last_message.write() = Some(Arc::clone(envelope));
    }

    /// Invoke the handler for the envelope's type. Returns `false` when none
    /// is registered.
    pub fn dispatch(&self, envelope: &Envelope) -> bool {
        let handler = self
            .table
            .read()
            .get(&envelope.message_type)
            .map(|r| Arc::clone(&r.handler));
        match handler {
            Some(handler) => {
                handler(envelope);
                true
            }
            None => false,
        }
    }

    /// Publish on the session broadcast channel.
    pub fn publish(&self, envelope: Arc<Envelope>) {
        // no receivers is fine
        let _ = self.events.send(envelope);
    }

    /// Receive every non-system inbound envelope from now on.
    pub fn events(&self) -> broadcast::Receiver<Arc<Envelope>> {
        self.events.subscribe()
    }

    /// Recent inbound envelopes, oldest first.
    pub fn history(&self) -> Vec<Arc<Envelope>> {
        self.history.lock().iter().cloned().collect()
    }

    /// Most recent inbound envelope.
    pub fn last_message(&self) -> Option<Arc<Envelope>> {
        self.last_message.read().clone()
    }

    fn unsubscribe(&self, message_type: MessageType, token: u64) -> bool {
        let mut table = self.table.write();
        if table.get(&message_type).is_some_and(|r| r.token == token) {
            let _ = table.remove(&message_type);
            true
        } else {
            false
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("subscribers", &self.subscriber_count())
            .field("history_limit", &self.history_limit)
            .finish_non_exhaustive()
    }
}

/// Handle to a registered handler. Unsubscribes on drop.
///
/// Only removes the handler it registered: if a later subscription replaced
/// it, dropping this handle leaves the newer one in place.
#[derive(Debug)]
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    router: Weak<Router>,
    message_type: MessageType,
    token: u64,
    active: bool,
}

impl Subscription {
    /// Message type this subscription covers.
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Whether this handle's handler is still the registered one.
    pub fn is_active(&self) -> bool {
        self.active
            && self.router.upgrade().is_some_and(|r| {
                r.table
                    .read()
                    .get(&self.message_type)
                    .is_some_and(|reg| reg.token == self.token)
            })
    }

    /// Remove the handler now. Returns `false` if it was already replaced or
    /// removed.
    pub fn unsubscribe(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.router
            .upgrade()
            .is_some_and(|r| r.unsubscribe(self.message_type, self.token))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tether_core::Payload;

    fn router() -> Arc<Router> {
        Router::new(&RouterSettings {
            history_limit: 3,
            broadcast_capacity: 16,
        })
    }

    fn envelope(ty: MessageType) -> Arc<Envelope> {
        Arc::new(Envelope::new(ty, Payload::new()))
    }

    #[test]
    fn last_registration_wins() {
        let router = router();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let f = first.clone();
        let s = second.clone();

        let old = router.subscribe(MessageType::Message, move |_| {
            let _ = f.fetch_add(1, Ordering::SeqCst);
        });
        let new = router.subscribe(MessageType::Message, move |_| {
            let _ = s.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!old.is_active());
        assert!(new.is_active());

        assert!(router.dispatch(&envelope(MessageType::Message)));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        // dropping the replaced handle must not remove the newer handler
        drop(old);
        assert!(router.has_subscriber(MessageType::Message));
        drop(new);
        assert!(!router.has_subscriber(MessageType::Message));
    }

    #[test]
    fn explicit_unsubscribe() {
        let router = router();
        let mut sub = router.subscribe(MessageType::NewMatch, |_| {});
        assert_eq!(sub.message_type(), MessageType::NewMatch);
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(!router.dispatch(&envelope(MessageType::NewMatch)));
        assert_eq!(router.subscriber_count(), 0);
    }

    #[test]
    fn history_is_bounded() {
        let router = router();
        for _ in 0..5 {
            router.record(&envelope(MessageType::Message));
        }
        let last = envelope(MessageType::Notification);
        router.record(&last);
        let history = router.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].id, last.id);
        assert_eq!(router.last_message().unwrap().id, last.id);
    }

    #[test]
    fn handler_may_subscribe_during_dispatch() {
        let router = router();
        let inner = router.clone();
        let slot = Arc::new(Mutex::new(None));
        let keep = slot.clone();
        let _sub = router.subscribe(MessageType::Message, move |_| {
            *keep.lock() = Some(inner.subscribe(MessageType::TypingStart, |_| {}));
        });
        assert!(router.dispatch(&envelope(MessageType::Message)));
        assert!(router.has_subscriber(MessageType::TypingStart));
    }

    #[tokio::test]
    async fn publish_reaches_receivers() {
        let router = router();
        let mut rx = router.events();
        let env = envelope(MessageType::BgpUpdate);
        router.publish(env.clone());
        assert_eq!(rx.recv().await.unwrap().id, env.id);
    }

    #[test]
    fn subscription_outliving_router_is_harmless() {
        let router = router();
        let mut sub = router.subscribe(MessageType::Message, |_| {});
        drop(router);
        assert!(!sub.is_active());
        assert!(!sub.unsubscribe());
    }
}
