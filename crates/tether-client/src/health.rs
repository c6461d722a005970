//! Connection health score.
//!
//! Advisory only: nothing here feeds back into connection management.
//!
//! | component   | points | rule                                               |
//! |-------------|--------|----------------------------------------------------|
//! | state       | 40     | connected 40, connecting 20, otherwise 0           |
//! | latency     | 30     | <100ms 30, <300ms 20, <1000ms 10, unknown/slow 0   |
//! | reliability | 20     | share of the recent samples that were connected   |
//! | backlog     | 10     | queue and pending both empty 10, both small 5      |

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tether_settings::HealthSettings;
use tokio::sync::watch;

use crate::state::{ConnectionState, SessionStatus};

/// One observation of the connection.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSample {
    /// State at the time.
    pub state: ConnectionState,
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
    /// Latency at the time.
    pub latency_ms: Option<f64>,
    /// Error message at the time.
    pub error: Option<String>,
}

/// Coarse label for a score.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    /// 80 and up.
    Excellent,
    /// 60 to 79.
    Good,
    /// 40 to 59.
    Fair,
    /// Below 40.
    #[default]
    Poor,
}

impl ConnectionQuality {
    /// Label for `score`.
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => Self::Excellent,
            60..=79 => Self::Good,
            40..=59 => Self::Fair,
            _ => Self::Poor,
        }
    }
}

/// Published health summary.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// 0 to 100.
    pub score: u8,
    /// Label for the score.
    pub quality: ConnectionQuality,
    /// State the score was computed for.
    pub state: ConnectionState,
    /// Latency the score was computed for.
    pub latency_ms: Option<f64>,
    /// Samples currently held.
    pub samples: usize,
}

/// Inputs to [`compute_score`].
#[derive(Clone, Copy, Debug)]
pub struct ScoreInputs<'a> {
    /// Current state.
    pub state: ConnectionState,
    /// Smoothed latency.
    pub latency_ms: Option<f64>,
    /// States of the reliability window, any order.
    pub recent: &'a [ConnectionState],
    /// Outbound queue length.
    pub queued: usize,
    /// Outstanding requests.
    pub pending: usize,
    /// "Small backlog" threshold.
    pub backlog_threshold: usize,
}

/// Score a connection from 0 to 100.
pub fn compute_score(inputs: &ScoreInputs<'_>) -> u8 {
    let state = match inputs.state {
        ConnectionState::Connected => 40,
        ConnectionState::Connecting => 20,
        _ => 0,
    };

    let latency = match inputs.latency_ms {
        Some(ms) if ms < 100.0 => 30,
        Some(ms) if ms < 300.0 => 20,
        Some(ms) if ms < 1000.0 => 10,
        _ => 0,
    };

    let reliability = if inputs.recent.is_empty() {
        0
    } else {
        let connected = inputs
            .recent
            .iter()
            .filter(|s| s.is_connected())
            .count();
        (connected * 20 + inputs.recent.len() / 2) / inputs.recent.len()
    };

    let backlog = if inputs.queued == 0 && inputs.pending == 0 {
        10
    } else if inputs.queued < inputs.backlog_threshold && inputs.pending < inputs.backlog_threshold
    {
        5
    } else {
        0
    };

    let total = state + latency + reliability + backlog;
    u8::try_from(total.min(100)).unwrap_or(100)
}

/// Sample history and score publisher.
#[derive(Debug)]
pub struct HealthMonitor {
    settings: HealthSettings,
    samples: VecDeque<HealthSample>,
    tx: watch::Sender<HealthReport>,
}

impl HealthMonitor {
    /// Create a monitor with no samples.
    pub fn new(settings: HealthSettings) -> Self {
        let (tx, _) = watch::channel(HealthReport::default());
        Self {
            settings,
            samples: VecDeque::new(),
            tx,
        }
    }

    /// Observe a status update.
    ///
    /// A sample is appended when state, latency or error changed since the
    /// previous sample. The score is recomputed every time since backlog
    /// sizes also count.
    pub fn observe(&mut self, status: &SessionStatus) -> HealthReport {
        let changed = self.samples.back().is_none_or(|last| {
            last.state != status.state
                || last.latency_ms != status.latency_ms
                || last.error != status.error
        });
        if changed {
            self.samples.push_back(HealthSample {
                state: status.state,
                timestamp: Utc::now(),
                latency_ms: status.latency_ms,
                error: status.error.clone(),
            });
            while self.samples.len() > self.settings.history_limit.max(1) {
                let _ = self.samples.pop_front();
            }
        }

        let recent: Vec<ConnectionState> = self
            .samples
            .iter()
            .rev()
            .take(self.settings.reliability_window)
            .map(|s| s.state)
            .collect();
        let score = compute_score(&ScoreInputs {
            state: status.state,
            latency_ms: status.latency_ms,
            recent: &recent,
            queued: status.queued,
            pending: status.pending,
            backlog_threshold: self.settings.backlog_threshold,
        });
        let report = HealthReport {
            score,
            quality: ConnectionQuality::from_score(score),
            state: status.state,
            latency_ms: status.latency_ms,
            samples: self.samples.len(),
        };
        let published = report.clone();
        let _ = self.tx.send_if_modified(|current| {
            if *current == published {
                false
            } else {
                *current = published;
                true
            }
        });
        report
    }

    /// Recorded samples, oldest first.
    pub fn samples(&self) -> Vec<HealthSample> {
        self.samples.iter().cloned().collect()
    }

    /// Subscribe to report changes.
    pub fn watch(&self) -> watch::Receiver<HealthReport> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(
        state: ConnectionState,
        latency_ms: Option<f64>,
        recent: &[ConnectionState],
    ) -> ScoreInputs<'_> {
        ScoreInputs {
            state,
            latency_ms,
            recent,
            queued: 0,
            pending: 0,
            backlog_threshold: 5,
        }
    }

    #[test]
    fn perfect_connection_scores_100() {
        let recent = [ConnectionState::Connected; 10];
        let score = compute_score(&inputs(ConnectionState::Connected, Some(50.0), &recent));
        assert_eq!(score, 100);
        assert_eq!(ConnectionQuality::from_score(score), ConnectionQuality::Excellent);
    }

    #[test]
    fn latency_bands() {
        let recent: [ConnectionState; 0] = [];
        let at = |ms| compute_score(&inputs(ConnectionState::Disconnected, ms, &recent)) - 10;
        assert_eq!(at(Some(99.0)), 30);
        assert_eq!(at(Some(100.0)), 20);
        assert_eq!(at(Some(299.0)), 20);
        assert_eq!(at(Some(999.0)), 10);
        assert_eq!(at(Some(1000.0)), 0);
        assert_eq!(at(None), 0);
    }

    #[test]
    fn reliability_is_proportional() {
        let mut recent = [ConnectionState::Connected; 10];
        for s in recent.iter_mut().take(5) {
            *s = ConnectionState::Reconnecting;
        }
        let score = compute_score(&inputs(ConnectionState::Connecting, None, &recent));
        // 20 state + 0 latency + 10 reliability + 10 backlog
        assert_eq!(score, 40);
        assert_eq!(ConnectionQuality::from_score(score), ConnectionQuality::Fair);
    }

    #[test]
    fn backlog_points() {
        let recent: [ConnectionState; 0] = [];
        let mut i = inputs(ConnectionState::Error, None, &recent);
        i.queued = 3;
        i.pending = 4;
        assert_eq!(compute_score(&i), 5);
        i.pending = 5;
        assert_eq!(compute_score(&i), 0);
    }

    #[test]
    fn monitor_appends_on_change_only() {
        let mut monitor = HealthMonitor::new(HealthSettings {
            history_limit: 3,
            ..HealthSettings::default()
        });
        let mut status = SessionStatus::default();
        let _ = monitor.observe(&status);
        let _ = monitor.observe(&status);
        assert_eq!(monitor.samples().len(), 1);

        status.queued = 2;
        let _ = monitor.observe(&status);
        assert_eq!(monitor.samples().len(), 1);

        for state in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
        ] {
            status.state = state;
            let _ = monitor.observe(&status);
        }
        let samples = monitor.samples();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].state, ConnectionState::Connecting);
    }

    #[test]
    fn monitor_publishes_reports() {
        let mut monitor = HealthMonitor::new(HealthSettings::default());
        let rx = monitor.watch();
        let status = SessionStatus {
            state: ConnectionState::Connected,
            latency_ms: Some(40.0),
            ..SessionStatus::default()
        };
        let report = monitor.observe(&status);
        // one connected sample out of one
        assert_eq!(report.score, 100);
        assert_eq!(rx.borrow().score, 100);
        assert_eq!(rx.borrow().quality, ConnectionQuality::Excellent);
    }
}
