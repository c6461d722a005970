//! Feature adapter and logging settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timers and list sizes used by the chat, matching, presence and
/// notification adapters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureSettings {
    /// A typing indicator clears this long after the last `TYPING_START`.
    pub typing_timeout_ms: u64,
    /// Local presence flips to away after this long without activity.
    pub idle_timeout_ms: u64,
    /// Normal-priority alerts are dismissed after this long.
    pub notification_dismiss_ms: u64,
    /// Size of each match/reveal list.
    pub match_history_limit: usize,
    /// Number of notifications kept.
    pub notification_limit: usize,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            typing_timeout_ms: 5_000,
            idle_timeout_ms: 300_000,
            notification_dismiss_ms: 5_000,
            match_history_limit: 10,
            notification_limit: 50,
        }
    }
}

impl FeatureSettings {
    /// Typing indicator expiry.
    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }

    /// Idle threshold for local presence.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Auto-dismiss delay for normal-priority alerts.
    pub fn notification_dismiss(&self) -> Duration {
        Duration::from_millis(self.notification_dismiss_ms)
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
