//! Wire protocol: message types and the envelope wrapper.
//!
//! Every frame exchanged over the persistent connection is a JSON
//! [`Envelope`]:
//!
//! ```json
//! {
//!   "type": "MESSAGE",
//!   "payload": { "matchId": "m-1", "content": "hi" },
//!   "timestamp": "2026-01-01T00:00:00Z",
//!   "id": "0190f3a4-...",
//!   "response_to": "0190f3a3-..."
//! }
//! ```
//!
//! `response_to` is only present on replies and is the sole key used to
//! resolve pending requests.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::errors::ProtocolError;
use crate::ids::EnvelopeId;

/// Envelope payload: a JSON object.
pub type Payload = serde_json::Map<String, Value>;

// ─────────────────────────────────────────────────────────────────────────────
// MessageType
// ─────────────────────────────────────────────────────────────────────────────

/// Every message type understood by the realtime protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Client → server authentication request.
    Auth,
    /// Server accepted the credential.
    AuthSuccess,
    /// Server rejected the credential.
    AuthFailed,
    /// Chat message.
    Message,
    /// Chat message reached the recipient.
    MessageDelivered,
    /// Chat message was read.
    MessageRead,
    /// A user started typing.
    TypingStart,
    /// A user stopped typing.
    TypingStop,
    /// A new match was created.
    NewMatch,
    /// A like was sent or received.
    MatchLiked,
    /// Both sides liked each other.
    MatchMutual,
    /// A match candidate was passed on.
    MatchPassed,
    /// A profile reveal was requested.
    RevealRequest,
    /// A reveal request was accepted.
    RevealAccepted,
    /// A reveal request was declined.
    RevealDeclined,
    /// Both sides agreed to reveal.
    RevealMutual,
    /// A user came online.
    UserOnline,
    /// A user went offline.
    UserOffline,
    /// Application notification.
    Notification,
    /// A trust score changed.
    TrustScoreUpdate,
    /// A behavioral graph profile changed.
    BgpUpdate,
    /// Client liveness probe.
    Heartbeat,
    /// Server reply to a heartbeat.
    HeartbeatAck,
    /// Server-reported error.
    Error,
    /// Server asks the client to reconnect.
    Reconnect,
}

impl MessageType {
    /// All message types in protocol order.
    pub const ALL: [Self; 25] = [
        Self::Auth,
        Self::AuthSuccess,
        Self::AuthFailed,
        Self::Message,
        Self::MessageDelivered,
        Self::MessageRead,
        Self::TypingStart,
        Self::TypingStop,
        Self::NewMatch,
        Self::MatchLiked,
        Self::MatchMutual,
        Self::MatchPassed,
        Self::RevealRequest,
        Self::RevealAccepted,
        Self::RevealDeclined,
        Self::RevealMutual,
        Self::UserOnline,
        Self::UserOffline,
        Self::Notification,
        Self::TrustScoreUpdate,
        Self::BgpUpdate,
        Self::Heartbeat,
        Self::HeartbeatAck,
        Self::Error,
        Self::Reconnect,
    ];

    /// Wire name of this type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "AUTH",
            Self::AuthSuccess => "AUTH_SUCCESS",
            Self::AuthFailed => "AUTH_FAILED",
            Self::Message => "MESSAGE",
            Self::MessageDelivered => "MESSAGE_DELIVERED",
            Self::MessageRead => "MESSAGE_READ",
            Self::TypingStart => "TYPING_START",
            Self::TypingStop => "TYPING_STOP",
            Self::NewMatch => "NEW_MATCH",
            Self::MatchLiked => "MATCH_LIKED",
            Self::MatchMutual => "MATCH_MUTUAL",
            Self::MatchPassed => "MATCH_PASSED",
            Self::RevealRequest => "REVEAL_REQUEST",
            Self::RevealAccepted => "REVEAL_ACCEPTED",
            Self::RevealDeclined => "REVEAL_DECLINED",
            Self::RevealMutual => "REVEAL_MUTUAL",
            Self::UserOnline => "USER_ONLINE",
            Self::UserOffline => "USER_OFFLINE",
            Self::Notification => "NOTIFICATION",
            Self::TrustScoreUpdate => "TRUST_SCORE_UPDATE",
            Self::BgpUpdate => "BGP_UPDATE",
            Self::Heartbeat => "HEARTBEAT",
            Self::HeartbeatAck => "HEARTBEAT_ACK",
            Self::Error => "ERROR",
            Self::Reconnect => "RECONNECT",
        }
    }

    /// Types the connection manager acts on itself.
    ///
    /// These are dispatched to a registered subscriber like any other type
    /// but never reach the global broadcast channel.
    #[must_use]
    pub fn is_system(self) -> bool {
        matches!(
            self,
            Self::AuthSuccess | Self::AuthFailed | Self::Error | Self::Reconnect
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownType(s.to_owned()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Typed message wrapper exchanged over the persistent connection.
///
/// Once dispatched to consumers an envelope is shared behind an `Arc` and
/// never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Message body.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub payload: Payload,
    /// Creation time.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Unique ID of this envelope.
    #[serde(default)]
    pub id: EnvelopeId,
    /// ID of the envelope this one answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_to: Option<EnvelopeId>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Payload, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Payload>::deserialize(deserializer)?.unwrap_or_default())
}

impl Envelope {
    /// Create a fresh envelope with a new unique ID and the current time.
    #[must_use]
    pub fn new(message_type: MessageType, payload: Payload) -> Self {
        Self {
            message_type,
            payload,
            timestamp: Utc::now(),
            id: EnvelopeId::new(),
            response_to: None,
        }
    }

    /// Create a reply to `request`.
    #[must_use]
    pub fn reply(message_type: MessageType, payload: Payload, request: &EnvelopeId) -> Self {
        Self {
            response_to: Some(request.clone()),
            ..Self::new(message_type, payload)
        }
    }

    /// Parse one wire frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::InvalidJson)
    }

    /// Serialize to a wire frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// String field from the payload.
    #[must_use]
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// Convert an arbitrary JSON value into a payload object.
///
/// `null` becomes an empty payload; any other non-object is rejected.
pub fn payload_from(value: Value) -> Result<Payload, ProtocolError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Payload::new()),
        other => Err(ProtocolError::NotAnObject(json_kind(&other))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
