//! Protocol-level error types.
//!
//! Transport, session, and request errors live in `tether-client`; this
//! module only covers failures of the wire vocabulary itself.

use thiserror::Error;

/// Failure to encode or decode an envelope.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Inbound frame was not a valid envelope.
    #[error("invalid envelope: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// Outbound envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    /// Payload must be a JSON object.
    #[error("payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// Message type string is not part of the protocol.
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

impl ProtocolError {
    /// Whether the failure concerns an inbound frame (as opposed to local encoding).
    #[must_use]
    pub fn is_inbound(&self) -> bool {
        matches!(self, Self::InvalidJson(_) | Self::UnknownType(_))
    }
}
