//! Request/response correlation.
//!
//! A send with `expect_response` gets an entry keyed by the envelope ID when
//! it goes on the wire. The only matching rule is an inbound envelope whose
//! `response_to` equals that ID. The tracker never resends; a timeout is
//! reported once to the caller with the remaining retry budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tether_core::{Envelope, EnvelopeId};
use tokio::sync::oneshot;
use tracing::debug;

use crate::errors::ResponseError;
use crate::scheduler::TaskHandle;

/// Outcome delivered to a request's waiter.
pub type ResponseResult = Result<Arc<Envelope>, ResponseError>;

/// Sending half of a request's waiter.
pub type Responder = oneshot::Sender<ResponseResult>;

/// Per-send options.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Track the envelope until a response with a matching `response_to` arrives.
    pub expect_response: bool,
    /// Response timeout; the session default when `None`.
    pub timeout: Option<Duration>,
    /// Retry budget reported on timeout; the session default when `None`.
    pub retries: Option<u32>,
}

impl SendOptions {
    /// Fire-and-forget.
    pub fn fire_and_forget() -> Self {
        Self::default()
    }

    /// Expect a response using the session defaults.
    pub fn expect_response() -> Self {
        Self {
            expect_response: true,
            ..Self::default()
        }
    }

    /// Override the response timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the retry budget.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// Awaitable response to a request.
#[derive(Debug)]
pub struct PendingResponse {
    id: EnvelopeId,
    rx: oneshot::Receiver<ResponseResult>,
}

impl PendingResponse {
    pub(crate) fn new(id: EnvelopeId, rx: oneshot::Receiver<ResponseResult>) -> Self {
        Self { id, rx }
    }

    /// ID of the request envelope.
    pub fn id(&self) -> &EnvelopeId {
        &self.id
    }

    /// Wait for the response or its failure.
    pub async fn wait(self) -> ResponseResult {
        self.rx.await.unwrap_or(Err(ResponseError::SessionClosed))
    }
}

/// A request on the wire awaiting its response.
#[derive(Debug)]
pub struct PendingEntry {
    /// The request as sent.
    pub envelope: Envelope,
    timeout: TaskHandle,
    retries_remaining: u32,
    responder: Responder,
}

/// Table of outstanding requests.
#[derive(Debug)]
pub struct PendingTracker {
    entries: HashMap<EnvelopeId, PendingEntry>,
    max_pending: usize,
}

impl PendingTracker {
    /// Create an empty tracker holding at most `max_pending` entries.
    pub fn new(max_pending: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_pending,
        }
    }

    /// Whether another entry fits.
    pub fn has_capacity(&self) -> bool {
        self.entries.len() < self.max_pending
    }

    /// Configured cap.
    pub fn limit(&self) -> usize {
        self.max_pending
    }

    /// Track `envelope` until its response arrives or `timeout` fires.
    pub fn register(
        &mut self,
        envelope: Envelope,
        timeout: TaskHandle,
        retries: u32,
        responder: Responder,
    ) {
        let id = envelope.id.clone();
        let previous = self.entries.insert(
            id,
            PendingEntry {
                envelope,
                timeout,
                retries_remaining: retries,
                responder,
            },
        );
        if let Some(old) = previous {
            let _ = old.timeout.cancel();
        }
    }

    /// Resolve the entry `response` answers. Returns `false` when the
    /// envelope has no `response_to` or nothing is waiting for it.
    pub fn resolve(&mut self, response: &Arc<Envelope>) -> bool {
        let Some(request_id) = response.response_to.as_ref() else {
            return false;
        };
        let Some(entry) = self.entries.remove(request_id) else {
            return false;
        };
        let _ = entry.timeout.cancel();
        debug!(id = %request_id, "response matched");
        let _ = entry.responder.send(Ok(Arc::clone(response)));
        true
    }

    /// Fail the entry for `id` with a timeout. Returns `false` if it was
    /// already resolved.
    pub fn expire(&mut self, id: &EnvelopeId) -> bool {
        let Some(entry) = self.entries.remove(id) else {
            return false;
        };
        let retries_remaining = entry.retries_remaining.saturating_sub(1);
        debug!(id = %id, retries_remaining, "response timed out");
        let _ = entry.responder.send(Err(ResponseError::TimedOut {
            id: id.clone(),
            retries_remaining,
        }));
        true
    }

    /// Fail every entry with `error` and cancel their timeouts.
    pub fn fail_all(&mut self, error: &ResponseError) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            let _ = entry.timeout.cancel();
            let _ = entry.responder.send(Err(error.clone()));
        }
        count
    }

    /// Whether `id` is outstanding.
    pub fn contains(&self, id: &EnvelopeId) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
