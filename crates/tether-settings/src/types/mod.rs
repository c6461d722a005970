//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`,
//! so a settings file only needs the fields it overrides.

mod connection;
mod features;

pub use connection::*;
pub use features::*;

use serde::{Deserialize, Serialize};
pub use tether_core::retry::RetryConfig;

/// Root settings type.
///
/// ```json
/// {
///   "connection": { "baseUrl": "https://app.example.com" },
///   "retry": { "maxRetries": 8 },
///   "heartbeat": { "intervalMs": 15000 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Connection target and handshake.
    pub connection: ConnectionSettings,
    /// Reconnection backoff.
    pub retry: RetryConfig,
    /// Heartbeat and latency sampling.
    pub heartbeat: HeartbeatSettings,
    /// Request/response correlation.
    pub requests: RequestSettings,
    /// Outbound queue while disconnected.
    pub queue: QueueSettings,
    /// Inbound message routing.
    pub router: RouterSettings,
    /// Connection health scoring.
    pub health: HealthSettings,
    /// Feature adapter timers and list sizes.
    pub features: FeatureSettings,
    /// Log output.
    pub logging: LoggingSettings,
}
