//! Reconnection backoff configuration and delay calculation.
//!
//! The connection manager owns the attempt counter; this module only holds
//! the parameters and the math:
//!
//! - [`RetryConfig`]: retry budget, base delay, cap, jitter
//! - [`backoff_delay`]: `base * 2^(attempt - 1)`, capped, with optional jitter

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default maximum reconnection attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
/// Default jitter factor (0.0–1.0). Zero keeps the schedule exact.
pub const DEFAULT_JITTER_FACTOR: f64 = 0.0;

/// Reconnection retry parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum number of reconnection attempts before giving up (default: 5).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff in ms (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay between attempts in ms (default: 60000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0 (default: 0.0).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryConfig {
    /// Delay before reconnection attempt `attempt` (1-based).
    ///
    /// `random` must be in `[0.0, 1.0)`; it is ignored when the jitter
    /// factor is zero.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, random: f64) -> Duration {
        Duration::from_millis(backoff_delay(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            random,
        ))
    }

    /// First attempt within the retry budget whose delay is clipped to
    /// `max_delay_ms`, or `None` when every attempt gets the full
    /// `base * 2^(attempt - 1)` delay.
    ///
    /// The cap is kept on purpose: a long budget backs off to a steady
    /// `max_delay_ms` instead of growing without bound.
    #[must_use]
    pub fn capped_from(&self) -> Option<u32> {
        // the exponent stops growing at 31
        (1..=self.max_retries.min(32)).find(|&attempt| {
            backoff_delay(attempt, self.base_delay_ms, u64::MAX, 0.0, 0.0) > self.max_delay_ms
        })
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    #[must_use]
    pub fn allows(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_retries
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Exponential backoff delay in milliseconds.
///
/// Formula: `min(max_delay, base_delay * 2^(attempt - 1)) * (1 + (2r - 1) * jitter)`
///
/// `attempt` is 1-based; attempt 0 is treated as attempt 1. The jitter is
/// symmetric: a factor of 0.2 varies the delay by ±20%.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponent = attempt.saturating_sub(1).min(31);
    let exponential = base_delay_ms.saturating_mul(1u64 << exponent);
    let capped = exponential.min(max_delay_ms);

    if jitter_factor <= 0.0 {
        return capped;
    }

    // Maps random [0,1) to [-jitter, +jitter]
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor.min(1.0);
    ((capped as f64) * jitter).round().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
