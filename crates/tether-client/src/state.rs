//! Observable connection state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the persistent connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No link and no reconnection scheduled.
    #[default]
    Disconnected,
    /// A link is being opened or is awaiting `AUTH_SUCCESS`.
    Connecting,
    /// Authenticated and usable.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// Terminal failure: authentication rejected or retries exhausted.
    Error,
}

impl ConnectionState {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }

    /// Whether the link is authenticated.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of everything presentation code needs about the connection.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Last connection-level error message, for display.
    pub error: Option<String>,
    /// Smoothed heartbeat round-trip time, if known.
    pub latency_ms: Option<f64>,
    /// Reconnection attempts made since the last successful auth.
    pub reconnect_attempt: u32,
    /// Messages waiting in the outbound queue.
    pub queued: usize,
    /// Requests awaiting a response.
    pub pending: usize,
}
