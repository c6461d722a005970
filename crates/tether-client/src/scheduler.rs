//! Cancellable scheduled tasks.
//!
//! Every timer in a session (reconnect backoff, auth timeout, heartbeat
//! interval and watchdog, response timeouts, feature expiry timers) is a
//! labelled task registered here, so teardown can cancel them by group and
//! tests can enumerate what is still live.
//!
//! A task's entry is removed before its callback runs. A cancelled task never
//! runs; a one-shot task that fires runs exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Which owner a task belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskGroup {
    /// Connection-scoped timers. Cleared on every disconnect.
    Transport,
    /// Feature adapter timers. Survive reconnects.
    Feature,
}

/// Opaque task identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

struct TaskEntry {
    label: &'static str,
    group: TaskGroup,
    cancel: CancellationToken,
}

/// Registry of live scheduled tasks.
///
/// Must be used from within a Tokio runtime.
#[derive(Default)]
pub struct Scheduler {
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
    next_id: AtomicU64,
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run `callback` once after `delay` unless cancelled first.
    pub fn schedule<F>(
        self: &Arc<Self>,
        group: TaskGroup,
        label: &'static str,
        delay: Duration,
        callback: F,
    ) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let (id, token) = self.register(group, label);
        let weak = Arc::downgrade(self);

        drop(tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = time::sleep(delay) => {
                    let live = weak.upgrade().is_some_and(|s| s.finish(id));
                    if live {
                        callback();
                    }
                }
            }
        }));

        TaskHandle {
            id,
            scheduler: Arc::downgrade(self),
        }
    }

    /// Run `callback` every `period` (first run after one period) until
    /// cancelled.
    pub fn schedule_repeating<F>(
        self: &Arc<Self>,
        group: TaskGroup,
        label: &'static str,
        period: Duration,
        mut callback: F,
    ) -> TaskHandle
    where
        F: FnMut() + Send + 'static,
    {
        let (id, token) = self.register(group, label);
        let weak = Arc::downgrade(self);

        drop(tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let live = weak.upgrade().is_some_and(|s| s.is_live(id));
                        if !live {
                            break;
                        }
                        callback();
                    }
                }
            }
        }));

        TaskHandle {
            id,
            scheduler: Arc::downgrade(self),
        }
    }

    /// Cancel one task. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&self, id: TaskId) -> bool {
        let entry = self.tasks.lock().remove(&id);
        match entry {
            Some(entry) => {
                entry.cancel.cancel();
                trace!(label = entry.label, "task cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every task in `group`. Returns how many were cancelled.
    pub fn cancel_group(&self, group: TaskGroup) -> usize {
        let mut tasks = self.tasks.lock();
        let ids: Vec<TaskId> = tasks
            .iter()
            .filter(|(_, e)| e.group == group)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some(entry) = tasks.remove(id) {
                entry.cancel.cancel();
            }
        }
        ids.len()
    }

    /// Cancel every task.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<TaskEntry> = self.tasks.lock().drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.cancel.cancel();
        }
        drained.len()
    }

    /// Labels of the live tasks in `group`, sorted.
    pub fn live_tasks(&self, group: TaskGroup) -> Vec<&'static str> {
        let mut labels: Vec<&'static str> = self
            .tasks
            .lock()
            .values()
            .filter(|e| e.group == group)
            .map(|e| e.label)
            .collect();
        labels.sort_unstable();
        labels
    }

    /// Number of live tasks across all groups.
    pub fn live_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether `id` is still scheduled.
    pub fn is_live(&self, id: TaskId) -> bool {
        self.tasks.lock().contains_key(&id)
    }

    fn register(&self, group: TaskGroup, label: &'static str) -> (TaskId, CancellationToken) {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let token = CancellationToken::new();
        let _ = self.tasks.lock().insert(
            id,
            TaskEntry {
                label,
                group,
                cancel: token.clone(),
            },
        );
        (id, token)
    }

    fn finish(&self, id: TaskId) -> bool {
        self.tasks.lock().remove(&id).is_some()
    }
}

/// Handle to a scheduled task.
///
/// Dropping the handle does not cancel the task.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    id: TaskId,
    scheduler: Weak<Scheduler>,
}

impl TaskHandle {
    /// Task identifier.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Cancel the task. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&self) -> bool {
        self.scheduler
            .upgrade()
            .is_some_and(|s| s.cancel(self.id))
    }

    /// Whether the task is still scheduled.
    pub fn is_live(&self) -> bool {
        self.scheduler
            .upgrade()
            .is_some_and(|s| s.is_live(self.id))
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("live", &self.live_count())
            .finish_non_exhaustive()
    }
}
