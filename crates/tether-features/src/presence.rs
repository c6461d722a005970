//! Presence adapter.
//!
//! Tracks which users the server reports online and their last known
//! activity status. Separately infers the local user's own status: after
//! the idle timeout without [`PresenceAdapter::record_activity`] it flips to
//! `Away`, and the next activity flips it back to `Active`. The local status
//! does not depend on anything the server sends.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tether_client::{Scheduler, SessionHandle, Subscription, TaskGroup, TaskHandle};
use tether_core::{Envelope, MessageType, UserId};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Label of the local idle timer.
pub const IDLE_LABEL: &str = "presence.idle";

/// Activity status of a user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    /// Interacting recently.
    #[default]
    Active,
    /// No interaction for a while.
    Away,
}

impl ActivityStatus {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(s) if s.eq_ignore_ascii_case("away") => Self::Away,
            _ => Self::Active,
        }
    }
}

#[derive(Debug, Default)]
struct PresenceState {
    online: HashSet<UserId>,
    statuses: HashMap<UserId, ActivityStatus>,
}

#[derive(Debug)]
struct IdleTracker {
    scheduler: Arc<Scheduler>,
    timeout: Duration,
    timer: Mutex<Option<TaskHandle>>,
    local: watch::Sender<ActivityStatus>,
}

impl IdleTracker {
    fn arm(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let timer = self.scheduler.schedule(TaskGroup::Feature, IDLE_LABEL, self.timeout, move || {
            if let Some(tracker) = weak.upgrade() {
                tracker.went_idle();
            }
        });
        if let Some(previous) = self.timer.lock().replace(timer) {
            let _ = previous.cancel();
        }
    }

    fn went_idle(&self) {
        let changed = self.local.send_if_modified(|status| {
            let was_active = *status == ActivityStatus::Active;
            *status = ActivityStatus::Away;
            was_active
        });
        if changed {
            info!(idle_secs = self.timeout.as_secs(), "local user away");
        }
    }

    fn disarm(&self) {
        if let Some(timer) = self.timer.lock().take() {
            let _ = timer.cancel();
        }
    }
}

/// Presence state derived from the session plus local idle detection.
#[derive(Debug)]
pub struct PresenceAdapter {
    state: Arc<Mutex<PresenceState>>,
    idle: Arc<IdleTracker>,
    _subscriptions: Vec<Subscription>,
}

impl PresenceAdapter {
    /// Subscribe to presence traffic on `session` and start the idle timer.
    pub fn new(session: &SessionHandle) -> Self {
        let state = Arc::new(Mutex::new(PresenceState::default()));

        let online_state = Arc::clone(&state);
        let online = session.subscribe(MessageType::UserOnline, move |env| {
            if let Some(user) = presence_user(env) {
                let status = ActivityStatus::parse(env.payload_str("status"));
                debug!(user_id = %user, ?status, "user online");
                let mut state = online_state.lock();
                let _ = state.statuses.insert(user.clone(), status);
                let _ = state.online.insert(user);
            }
        });

        let offline_state = Arc::clone(&state);
        let offline = session.subscribe(MessageType::UserOffline, move |env| {
            if let Some(user) = presence_user(env) {
                debug!(user_id = %user, "user offline");
                let _ = offline_state.lock().online.remove(&user);
            }
        });

        let (local, _) = watch::channel(ActivityStatus::Active);
        let idle = Arc::new(IdleTracker {
            scheduler: Arc::clone(session.scheduler()),
            timeout: session.settings().features.idle_timeout(),
            timer: Mutex::new(None),
            local,
        });
        idle.arm();

        Self {
            state,
            idle,
            _subscriptions: vec![online, offline],
        }
    }

    /// Note a user-interaction signal. Restarts the idle timer and returns
    /// the local status to `Active`.
    pub fn record_activity(&self) {
        let changed = self.idle.local.send_if_modified(|status| {
            let was_away = *status == ActivityStatus::Away;
            *status = ActivityStatus::Active;
            was_away
        });
        if changed {
            info!("local user active");
        }
        self.idle.arm();
    }

    /// The local user's inferred status.
    pub fn local_status(&self) -> ActivityStatus {
        *self.idle.local.borrow()
    }

    /// Watch the local user's inferred status.
    pub fn watch_local_status(&self) -> watch::Receiver<ActivityStatus> {
        self.idle.local.subscribe()
    }

    /// Whether the server last reported `user` online.
    pub fn is_online(&self, user: &UserId) -> bool {
        self.state.lock().online.contains(user)
    }

    /// Users currently online, sorted.
    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.state.lock().online.iter().cloned().collect();
        users.sort();
        users
    }

    /// Last known status of `user`, kept after they go offline.
    pub fn status_of(&self, user: &UserId) -> Option<ActivityStatus> {
        self.state.lock().statuses.get(user).copied()
    }
}

impl Drop for PresenceAdapter {
    fn drop(&mut self) {
        self.idle.disarm();
    }
}

fn presence_user(envelope: &Envelope) -> Option<UserId> {
    let user = envelope.payload_str("userId").map(UserId::from);
    if user.is_none() {
        warn!(message_type = %envelope.message_type, "presence event without userId");
    }
    user
}
