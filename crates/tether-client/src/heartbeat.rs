//! Heartbeat liveness probe and latency sampling.
//!
//! While connected, a repeating task asks the session loop to send a
//! `HEARTBEAT` carrying a send timestamp and a ping ID. Each ping arms a
//! watchdog. A matching `HEARTBEAT_ACK` cancels the watchdog and folds the
//! round trip into an exponential moving average; a watchdog that fires
//! first clears the latency to unknown. Missed heartbeats never close the
//! connection.

use std::sync::Arc;

use serde_json::json;
use tether_core::{Envelope, MessageType, protocol::payload_from};
use tether_settings::HeartbeatSettings;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::scheduler::{Scheduler, TaskGroup, TaskHandle};

/// Label of the repeating heartbeat task.
pub const INTERVAL_LABEL: &str = "heartbeat.interval";
/// Label of the per-ping watchdog task.
pub const WATCHDOG_LABEL: &str = "heartbeat.watchdog";

/// Exponential moving average of round-trip samples.
#[derive(Clone, Debug, PartialEq)]
pub struct LatencyEstimator {
    weight: f64,
    average: Option<f64>,
}

impl LatencyEstimator {
    /// `weight` is the share given to each new sample.
    pub fn new(weight: f64) -> Self {
        Self {
            weight: weight.clamp(0.0, 1.0),
            average: None,
        }
    }

    /// Fold in a sample. The first sample seeds the average.
    pub fn record(&mut self, sample_ms: f64) -> f64 {
        let next = match self.average {
            Some(avg) => (1.0 - self.weight) * avg + self.weight * sample_ms,
            None => sample_ms,
        };
        self.average = Some(next);
        next
    }

    /// Forget the average.
    pub fn clear(&mut self) {
        self.average = None;
    }

    /// Current average, if any sample has been recorded since the last clear.
    pub fn average(&self) -> Option<f64> {
        self.average
    }
}

#[derive(Debug)]
struct Outstanding {
    ping_id: String,
    sent_at: Instant,
    watchdog: TaskHandle,
}

/// Heartbeat state owned by the session loop.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    settings: HeartbeatSettings,
    scheduler: Arc<Scheduler>,
    interval: Option<TaskHandle>,
    outstanding: Option<Outstanding>,
    latency: LatencyEstimator,
}

impl HeartbeatMonitor {
    /// Create a stopped monitor.
    pub fn new(settings: HeartbeatSettings, scheduler: Arc<Scheduler>) -> Self {
        let latency = LatencyEstimator::new(settings.ema_weight);
        Self {
            settings,
            scheduler,
            interval: None,
            outstanding: None,
            latency,
        }
    }

    /// Start the repeating tick. `on_tick` runs once per interval.
    pub fn start<F>(&mut self, on_tick: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.stop_timers();
        self.interval = Some(self.scheduler.schedule_repeating(
            TaskGroup::Transport,
            INTERVAL_LABEL,
            self.settings.interval(),
            on_tick,
        ));
        debug!(interval_ms = self.settings.interval_ms, "heartbeat started");
    }

    /// Whether the repeating tick is scheduled.
    pub fn is_running(&self) -> bool {
        self.interval.as_ref().is_some_and(TaskHandle::is_live)
    }

    /// Build the next `HEARTBEAT` and arm its watchdog.
    ///
    /// `on_timeout` receives the ping ID when the watchdog fires. A ping still
    /// outstanding from the previous tick is abandoned.
    pub fn ping<F>(&mut self, on_timeout: F) -> Envelope
    where
        F: FnOnce(String) + Send + 'static,
    {
        if let Some(previous) = self.outstanding.take() {
            let _ = previous.watchdog.cancel();
        }

        let timestamp = chrono::Utc::now().timestamp_millis();
        let mut envelope = Envelope::new(MessageType::Heartbeat, tether_core::Payload::new());
        let ping_id = envelope.id.to_string();
        if let Ok(payload) = payload_from(json!({ "timestamp": timestamp, "pingId": ping_id })) {
            envelope.payload = payload;
        }

        let watchdog_id = ping_id.clone();
        let watchdog = self.scheduler.schedule(
            TaskGroup::Transport,
            WATCHDOG_LABEL,
            self.settings.timeout(),
            move || on_timeout(watchdog_id),
        );

        self.outstanding = Some(Outstanding {
            ping_id,
            sent_at: Instant::now(),
            watchdog,
        });
        envelope
    }

    /// Handle a `HEARTBEAT_ACK`. Returns the updated average when the ack
    /// answers the outstanding ping.
    pub fn acknowledge(&mut self, ack: &Envelope) -> Option<f64> {
        let outstanding = self.outstanding.as_ref()?;
        let by_reply = ack
            .response_to
            .as_ref()
            .is_some_and(|id| id.as_str() == outstanding.ping_id);
        let by_payload = ack.payload_str("pingId") == Some(outstanding.ping_id.as_str());
        if !by_reply && !by_payload {
            debug!("heartbeat ack for unknown ping, ignoring");
            return None;
        }

        let outstanding = self.outstanding.take()?;
        let _ = outstanding.watchdog.cancel();
        #[allow(clippy::cast_precision_loss)]
        let sample = outstanding.sent_at.elapsed().as_millis() as f64;
        let average = self.latency.record(sample);
        debug!(sample_ms = sample, latency_ms = average, "heartbeat ack");
        Some(average)
    }

    /// Handle a fired watchdog. Returns `true` if it cleared the latency.
    pub fn watchdog_expired(&mut self, ping_id: &str) -> bool {
        let matches = self
            .outstanding
            .as_ref()
            .is_some_and(|o| o.ping_id == ping_id);
        if !matches {
            return false;
        }
        self.outstanding = None;
        self.latency.clear();
        warn!(ping_id, timeout_ms = self.settings.timeout_ms, "heartbeat ack missed");
        true
    }

    /// Stop the tick and watchdog and forget the latency.
    pub fn stop(&mut self) {
        self.stop_timers();
        self.latency.clear();
    }

    /// Smoothed round-trip time.
    pub fn latency_ms(&self) -> Option<f64> {
        self.latency.average()
    }

    fn stop_timers(&mut self) {
        if let Some(interval) = self.interval.take() {
            let _ = interval.cancel();
        }
        if let Some(outstanding) = self.outstanding.take() {
            let _ = outstanding.watchdog.cancel();
        }
    }
}
