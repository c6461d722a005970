//! Transport-side settings: connection, heartbeat, requests, queue, routing, health.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection target and handshake settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Origin of the active deployment (e.g. `https://app.example.com`).
    ///
    /// The WebSocket scheme is derived from it; see [`crate::endpoint::ws_url`].
    pub base_url: String,
    /// Fixed path suffix of the realtime endpoint.
    pub path: String,
    /// How long to wait for `AUTH_SUCCESS`/`AUTH_FAILED` after the link opens.
    pub auth_timeout_ms: u64,
    /// Close codes treated as a clean shutdown (no reconnection).
    pub clean_close_codes: Vec<u16>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            path: "/ws".to_string(),
            auth_timeout_ms: 10_000,
            clean_close_codes: vec![1000],
        }
    }
}

impl ConnectionSettings {
    /// Full WebSocket URL for this deployment.
    pub fn ws_url(&self) -> crate::Result<String> {
        crate::endpoint::ws_url(&self.base_url, &self.path)
    }

    /// Auth handshake timeout.
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    /// Whether `code` is a clean close.
    pub fn is_clean_close(&self, code: u16) -> bool {
        self.clean_close_codes.contains(&code)
    }
}

/// Heartbeat settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Interval between heartbeats while connected.
    pub interval_ms: u64,
    /// Watchdog: how long to wait for `HEARTBEAT_ACK`.
    pub timeout_ms: u64,
    /// Weight of a new sample in the latency moving average.
    pub ema_weight: f64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            timeout_ms: 5_000,
            ema_weight: 0.2,
        }
    }
}

impl HeartbeatSettings {
    /// Heartbeat interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Watchdog timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Request/response correlation settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestSettings {
    /// Default response timeout.
    pub timeout_ms: u64,
    /// Default retry budget reported back on timeout.
    pub retries: u32,
    /// Maximum number of requests awaiting a response.
    pub max_pending: usize,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            retries: 3,
            max_pending: 256,
        }
    }
}

impl RequestSettings {
    /// Default response timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// What to do when the outbound queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverflowPolicy {
    /// Evict the oldest queued message to make room.
    #[default]
    DropOldest,
    /// Refuse the new message.
    RejectNew,
}

/// Outbound queue settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueSettings {
    /// Maximum number of messages buffered while disconnected.
    pub max_queued: usize,
    /// Overflow behavior.
    pub overflow: OverflowPolicy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_queued: 500,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

/// Inbound routing settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterSettings {
    /// Number of recent inbound envelopes kept in history.
    pub history_limit: usize,
    /// Capacity of the session-wide broadcast channel.
    pub broadcast_capacity: usize,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            history_limit: 100,
            broadcast_capacity: 256,
        }
    }
}

/// Health scoring settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthSettings {
    /// Number of samples kept.
    pub history_limit: usize,
    /// Number of most recent samples used for the reliability component.
    pub reliability_window: usize,
    /// Queue/pending size below which the backlog counts as "small".
    pub backlog_threshold: usize,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            history_limit: 20,
            reliability_window: 10,
            backlog_threshold: 5,
        }
    }
}
