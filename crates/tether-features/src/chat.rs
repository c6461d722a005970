//! Chat adapter: typing indicators, delivery status, incoming messages.
//!
//! Typing flags are per user. Each `TYPING_START` (re)arms that user's own
//! expiry timer; `TYPING_STOP` clears the flag at once. Delivery status only
//! moves forward (`Pending → Sent → Delivered → Read`), so a late or
//! duplicated receipt never downgrades a message.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tether_client::{
    Scheduler, SendOptions, SessionError, SessionHandle, Subscription, TaskGroup, TaskHandle,
};
use tether_core::{Envelope, EnvelopeId, MessageType, UserId};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Label of per-user typing expiry tasks.
pub const TYPING_LABEL: &str = "chat.typing";

/// Delivery state of one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Handed to the session, no acknowledgement yet.
    Pending,
    /// Acknowledged by the server.
    Sent,
    /// Delivered to the recipient.
    Delivered,
    /// Read by the recipient.
    Read,
    /// The send request failed.
    Failed,
}

impl DeliveryStatus {
    fn rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Read => Some(3),
            Self::Failed => None,
        }
    }

    /// Whether a message in `self` may move to `next`.
    ///
    /// Only a pending message can fail. A failed one still accepts delivery
    /// and read receipts, since those prove the server got it.
    pub fn can_advance_to(self, next: Self) -> bool {
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to > from,
            (Some(0), None) => true,
            (None, Some(to)) => to >= 2,
            _ => false,
        }
    }
}

/// An incoming chat message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Message ID (`messageId` from the payload, else the envelope ID).
    pub id: String,
    /// Author, when the server named one.
    pub sender: Option<UserId>,
    /// Addressee, when the server named one.
    pub recipient: Option<UserId>,
    /// Message text.
    pub content: String,
    /// Server timestamp of the envelope.
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Read a `MESSAGE` envelope.
    pub fn from_envelope(envelope: &Envelope) -> Self {
        Self {
            id: envelope
                .payload_str("messageId")
                .map_or_else(|| envelope.id.to_string(), str::to_string),
            sender: envelope.payload_str("senderId").map(UserId::from),
            recipient: envelope.payload_str("recipientId").map(UserId::from),
            content: envelope.payload_str("content").unwrap_or_default().to_string(),
            sent_at: envelope.timestamp,
        }
    }
}

#[derive(Debug)]
struct TypingEntry {
    seq: u64,
    timer: TaskHandle,
}

#[derive(Debug, Default)]
struct ChatState {
    typing: HashMap<UserId, TypingEntry>,
    statuses: HashMap<String, DeliveryStatus>,
    next_seq: u64,
}

/// Chat state derived from the session.
#[derive(Debug)]
pub struct ChatAdapter {
    session: SessionHandle,
    state: Arc<Mutex<ChatState>>,
    messages: broadcast::Sender<ChatMessage>,
    _subscriptions: Vec<Subscription>,
}

impl ChatAdapter {
    /// Subscribe to chat traffic on `session`.
    pub fn new(session: &SessionHandle) -> Self {
        let state = Arc::new(Mutex::new(ChatState::default()));
        let (messages, _) = broadcast::channel(session.settings().router.broadcast_capacity.max(1));
        let scheduler = Arc::clone(session.scheduler());
        let typing_timeout = session.settings().features.typing_timeout();

        let mut subscriptions = Vec::with_capacity(5);

        let tx = messages.clone();
        subscriptions.push(session.subscribe(MessageType::Message, move |env| {
            let message = ChatMessage::from_envelope(env);
            debug!(message_id = %message.id, "chat message received");
            // nobody listening is fine
            let _ = tx.send(message);
        }));

        for (message_type, status) in [
            (MessageType::MessageDelivered, DeliveryStatus::Delivered),
            (MessageType::MessageRead, DeliveryStatus::Read),
        ] {
            let state = Arc::clone(&state);
            subscriptions.push(session.subscribe(message_type, move |env| {
                match env.payload_str("messageId") {
                    Some(id) => {
                        let _ = advance(&state, id, status);
                    }
                    None => warn!(message_type = %env.message_type, "receipt without messageId"),
                }
            }));
        }

        let start_state = Arc::clone(&state);
        subscriptions.push(session.subscribe(MessageType::TypingStart, move |env| {
            if let Some(user) = typing_user(env) {
                start_typing(&start_state, &scheduler, typing_timeout, user);
            }
        }));

        let stop_state = Arc::clone(&state);
        subscriptions.push(session.subscribe(MessageType::TypingStop, move |env| {
            if let Some(user) = typing_user(env) {
                stop_typing(&stop_state, &user);
            }
        }));

        Self {
            session: session.clone(),
            state,
            messages,
            _subscriptions: subscriptions,
        }
    }

    /// Send a chat message and track its delivery status.
    ///
    /// Returns the message ID. The status starts at `Pending` and follows the
    /// server's reply and receipts.
    pub fn send_chat_message(
        &self,
        recipient: &UserId,
        content: &str,
    ) -> Result<EnvelopeId, SessionError> {
        let receipt = self.session.send(
            MessageType::Message,
            json!({ "recipientId": recipient, "content": content }),
            SendOptions::expect_response(),
        )?;
        let id = receipt.id.to_string();
        let _ = advance(&self.state, &id, DeliveryStatus::Pending);

        if let Some(response) = receipt.response {
            let state = Arc::downgrade(&self.state);
            drop(tokio::spawn(async move {
                let outcome = match response.wait().await {
                    Ok(reply) => match reply.message_type {
                        MessageType::MessageDelivered => DeliveryStatus::Delivered,
                        MessageType::MessageRead => DeliveryStatus::Read,
                        _ => DeliveryStatus::Sent,
                    },
                    Err(e) => {
                        warn!(message_id = %id, error = %e, "chat message failed");
                        DeliveryStatus::Failed
                    }
                };
                if let Some(state) = state.upgrade() {
                    let _ = advance(&state, &id, outcome);
                }
            }));
        }
        Ok(receipt.id)
    }

    /// Tell `recipient` that the local user started or stopped typing.
    pub fn send_typing(&self, recipient: &UserId, typing: bool) -> Result<EnvelopeId, SessionError> {
        let message_type = if typing {
            MessageType::TypingStart
        } else {
            MessageType::TypingStop
        };
        let receipt = self.session.send(
            message_type,
            json!({ "recipientId": recipient }),
            SendOptions::fire_and_forget(),
        )?;
        Ok(receipt.id)
    }

    /// Report a received message as read.
    pub fn mark_as_read(&self, message_id: &str) -> Result<EnvelopeId, SessionError> {
        let receipt = self.session.send(
            MessageType::MessageRead,
            json!({ "messageId": message_id }),
            SendOptions::fire_and_forget(),
        )?;
        let _ = advance(&self.state, message_id, DeliveryStatus::Read);
        Ok(receipt.id)
    }

    /// Delivery status of a message, if tracked.
    pub fn status(&self, message_id: &str) -> Option<DeliveryStatus> {
        self.state.lock().statuses.get(message_id).copied()
    }

    /// Whether `user` is currently typing.
    pub fn is_typing(&self, user: &UserId) -> bool {
        self.state.lock().typing.contains_key(user)
    }

    /// Users currently typing, sorted.
    pub fn typing_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.state.lock().typing.keys().cloned().collect();
        users.sort();
        users
    }

    /// Incoming chat messages from now on.
    pub fn messages(&self) -> broadcast::Receiver<ChatMessage> {
        self.messages.subscribe()
    }
}

impl Drop for ChatAdapter {
    fn drop(&mut self) {
        for (_, entry) in self.state.lock().typing.drain() {
            let _ = entry.timer.cancel();
        }
    }
}

fn typing_user(envelope: &Envelope) -> Option<UserId> {
    let user = envelope
        .payload_str("userId")
        .or_else(|| envelope.payload_str("senderId"));
    if user.is_none() {
        warn!(message_type = %envelope.message_type, "typing event without user");
    }
    user.map(UserId::from)
}

/// Move a message's status forward. Returns `true` if it changed.
fn advance(state: &Mutex<ChatState>, message_id: &str, next: DeliveryStatus) -> bool {
    let mut state = state.lock();
    match state.statuses.get_mut(message_id) {
        Some(current) if current.can_advance_to(next) => {
            debug!(message_id, from = ?*current, to = ?next, "delivery status");
            *current = next;
            true
        }
        Some(_) => false,
        None => {
            let _ = state.statuses.insert(message_id.to_string(), next);
            true
        }
    }
}

fn start_typing(
    state: &Arc<Mutex<ChatState>>,
    scheduler: &Arc<Scheduler>,
    timeout: Duration,
    user: UserId,
) {
    let mut guard = state.lock();
    guard.next_seq += 1;
    let seq = guard.next_seq;

    let weak = Arc::downgrade(state);
    let expired = user.clone();
    let timer = scheduler.schedule(TaskGroup::Feature, TYPING_LABEL, timeout, move || {
        if let Some(state) = weak.upgrade() {
            expire_typing(&state, &expired, seq);
        }
    });
    if let Some(previous) = guard.typing.insert(user, TypingEntry { seq, timer }) {
        let _ = previous.timer.cancel();
    }
}

fn stop_typing(state: &Mutex<ChatState>, user: &UserId) {
    if let Some(entry) = state.lock().typing.remove(user) {
        let _ = entry.timer.cancel();
    }
}

// A newer TYPING_START for the same user replaces the entry; only the timer
// that armed the current entry may clear it.
fn expire_typing(state: &Mutex<ChatState>, user: &UserId, seq: u64) {
    let mut state = state.lock();
    if state.typing.get(user).is_some_and(|e| e.seq == seq) {
        let _ = state.typing.remove(user);
        debug!(user_id = %user, "typing indicator expired");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::Payload;

    #[test]
    fn status_only_moves_forward() {
        use DeliveryStatus::*;
        assert!(Pending.can_advance_to(Sent));
        assert!(Sent.can_advance_to(Read));
        assert!(!Read.can_advance_to(Delivered));
        assert!(!Delivered.can_advance_to(Sent));
        assert!(!Sent.can_advance_to(Sent));
    }

    #[test]
    fn only_pending_can_fail() {
        use DeliveryStatus::*;
        assert!(Pending.can_advance_to(Failed));
        assert!(!Sent.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Sent));
        assert!(Failed.can_advance_to(Delivered));
    }

    #[test]
    fn advance_inserts_then_guards() {
        let state = Mutex::new(ChatState::default());
        assert!(advance(&state, "m1", DeliveryStatus::Delivered));
        assert!(!advance(&state, "m1", DeliveryStatus::Pending));
        assert!(advance(&state, "m1", DeliveryStatus::Read));
        assert_eq!(state.lock().statuses["m1"], DeliveryStatus::Read);
    }

    #[test]
    fn chat_message_falls_back_to_envelope_id() {
        let env = Envelope::new(
            MessageType::Message,
            tether_core::protocol::payload_from(json!({"senderId": "u2", "content": "hey"}))
                .unwrap(),
        );
        let msg = ChatMessage::from_envelope(&env);
        assert_eq!(msg.id, env.id.to_string());
        assert_eq!(msg.sender, Some(UserId::from("u2")));
        assert_eq!(msg.recipient, None);
        assert_eq!(msg.content, "hey");

        let bare = ChatMessage::from_envelope(&Envelope::new(MessageType::Message, Payload::new()));
        assert!(bare.content.is_empty());
    }
}
