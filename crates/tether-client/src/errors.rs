//! Client error types.

use tether_core::EnvelopeId;
use tether_core::errors::ProtocolError;
use thiserror::Error;

/// Failures opening or using the underlying transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint could not be reached or refused the upgrade.
    #[error("failed to connect to {url}: {reason}")]
    Connect {
        /// Target URL.
        url: String,
        /// Underlying failure.
        reason: String,
    },
    /// The link is gone.
    #[error("transport closed")]
    Closed,
    /// Socket-level I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by the session API itself.
#[derive(Debug, Error)]
pub enum SessionError {
    /// `connect()` was called without a bearer credential.
    #[error("no credentials set; call set_credentials before connect")]
    MissingCredentials,
    /// The configured base URL does not yield a usable endpoint.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// The session event loop has stopped.
    #[error("session closed")]
    SessionClosed,
    /// The payload is not a JSON object.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] ProtocolError),
    /// A request did not receive its response.
    #[error(transparent)]
    Response(#[from] ResponseError),
}

/// Why a request expecting a response did not get one.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// No response arrived within the timeout.
    #[error("request {id} timed out ({retries_remaining} retries remaining)")]
    TimedOut {
        /// The request envelope ID.
        id: EnvelopeId,
        /// Retry budget left for the caller.
        retries_remaining: u32,
    },
    /// The connection closed while the request was outstanding.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
    /// The message was evicted from the outbound queue or the queue was cleared.
    #[error("message dropped before it was sent")]
    Dropped,
    /// Too many requests are already awaiting responses.
    #[error("too many pending requests (limit {limit})")]
    Overloaded {
        /// Configured pending cap.
        limit: usize,
    },
    /// The session shut down.
    #[error("session closed")]
    SessionClosed,
}

impl ResponseError {
    /// Whether resending the request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TimedOut { retries_remaining, .. } if *retries_remaining > 0
        ) || matches!(self, Self::ConnectionClosed | Self::Overloaded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn timed_out_display_mentions_retries() {
        let err = ResponseError::TimedOut {
            id: EnvelopeId::from("m-1"),
            retries_remaining: 2,
        };
        assert_eq!(err.to_string(), "request m-1 timed out (2 retries remaining)");
    }

    #[test]
    fn retryable_classification() {
        let exhausted = ResponseError::TimedOut {
            id: EnvelopeId::from("m-1"),
            retries_remaining: 0,
        };
        assert!(!exhausted.is_retryable());
        assert!(ResponseError::ConnectionClosed.is_retryable());
        assert!(ResponseError::Overloaded { limit: 1 }.is_retryable());
        assert!(!ResponseError::Dropped.is_retryable());
        assert!(!ResponseError::SessionClosed.is_retryable());
    }

    #[test]
    fn protocol_error_converts_to_invalid_payload() {
        let err: SessionError = ProtocolError::NotAnObject("array").into();
        assert_matches!(err, SessionError::InvalidPayload(_));
    }

    #[test]
    fn io_error_converts() {
        let err: TransportError =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(err.to_string().contains("refused"));
    }
}
