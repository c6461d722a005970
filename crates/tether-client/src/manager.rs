//! Connection manager: the session event loop.
//!
//! One task owns the link, the reconnection state machine, the outbound
//! queue, the pending table, and the heartbeat. Everything reaches it as an
//! [`Event`] on a single channel (commands from handles, open results, timer
//! firings) or as a [`LinkEvent`] from the current link, so all mutation is
//! sequential and envelopes are handled in arrival order.
//!
//! State transitions:
//!
//! ```text
//! Disconnected/Error --connect--> Connecting --AUTH_SUCCESS--> Connected
//! Connecting/Connected --AUTH_FAILED--> Error (terminal)
//! Connected --clean close--> Disconnected
//! Connecting/Connected --other close--> Reconnecting --backoff--> Connecting
//! Reconnecting --budget exhausted--> Error
//! * --disconnect--> Disconnected
//! ```

use std::sync::Arc;

use serde_json::json;
use tether_core::protocol::payload_from;
use tether_core::{Envelope, EnvelopeId, MessageType, SessionId, UserId};
use tether_settings::TetherSettings;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::errors::{ResponseError, SessionError, TransportError};
use crate::health::HealthMonitor;
use crate::heartbeat::HeartbeatMonitor;
use crate::pending::{PendingTracker, Responder, SendOptions};
use crate::queue::{OutboundQueue, PushOutcome, QueueEntry};
use crate::router::Router;
use crate::scheduler::{Scheduler, TaskGroup, TaskHandle};
use crate::state::{ConnectionState, SessionStatus};
use crate::transport::{
    ABNORMAL_CLOSE, Connector, Frame, Link, LinkEvent, NORMAL_CLOSE, SERVICE_RESTART,
};

/// Close code used when the server never answered the auth handshake.
pub const AUTH_TIMEOUT_CLOSE: u16 = 4008;

/// Label of the reconnect backoff task.
pub const BACKOFF_LABEL: &str = "reconnect.backoff";
/// Label of the auth handshake timeout task.
pub const AUTH_TIMEOUT_LABEL: &str = "auth.timeout";
/// Label of per-request response timeout tasks.
pub const RESPONSE_TIMEOUT_LABEL: &str = "response.timeout";

const RETRIES_EXHAUSTED: &str = "maximum reconnection attempts reached";

/// Bearer credential supplied by the login flow.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer token.
    pub token: String,
    /// Authenticated user.
    pub user_id: UserId,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Requests from session handles.
#[derive(Debug)]
pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Send {
        envelope: Envelope,
        options: SendOptions,
        responder: Option<Responder>,
    },
    SetCredentials(Credentials),
    Shutdown,
}

/// Scheduled work coming due.
#[derive(Debug)]
pub(crate) enum TimerEvent {
    Backoff { generation: u64 },
    AuthTimeout { generation: u64 },
    HeartbeatTick,
    HeartbeatWatchdog { ping_id: String },
    ResponseTimeout { id: EnvelopeId },
}

/// Everything the loop reacts to besides link traffic.
#[derive(Debug)]
pub(crate) enum Event {
    Command(Command),
    Opened {
        generation: u64,
        result: Result<Link, TransportError>,
    },
    Timer(TimerEvent),
}

/// State owned by the session loop.
pub(crate) struct ConnectionManager {
    settings: Arc<TetherSettings>,
    // resolved once; a bad base URL fails every connect as a config error
    url: Result<String, String>,
    connector: Arc<dyn Connector>,
    scheduler: Arc<Scheduler>,
    router: Arc<Router>,
    events: mpsc::WeakUnboundedSender<Event>,
    session_id: SessionId,
    credentials: Option<Credentials>,

    state: ConnectionState,
    error: Option<String>,
    attempt: u32,
    // bumped on every open and every explicit disconnect; stale opens and
    // timers carry an older value
    generation: u64,
    link: Option<Link>,
    auth_timeout: Option<TaskHandle>,
    backoff: Option<TaskHandle>,

    queue: OutboundQueue,
    pending: PendingTracker,
    heartbeat: HeartbeatMonitor,
    health: HealthMonitor,
    status_tx: watch::Sender<SessionStatus>,
}

/// Channels the session handle reads from.
pub(crate) struct ManagerOutputs {
    pub status: watch::Receiver<SessionStatus>,
    pub health: watch::Receiver<crate::health::HealthReport>,
}

impl ConnectionManager {
    pub(crate) fn new(
        settings: Arc<TetherSettings>,
        connector: Arc<dyn Connector>,
        scheduler: Arc<Scheduler>,
        router: Arc<Router>,
        events: mpsc::WeakUnboundedSender<Event>,
        session_id: SessionId,
    ) -> (Self, ManagerOutputs) {
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let health = HealthMonitor::new(settings.health.clone());
        let outputs = ManagerOutputs {
            status: status_rx,
            health: health.watch(),
        };
        let manager = Self {
            url: settings.connection.ws_url().map_err(|e| e.to_string()),
            queue: OutboundQueue::new(&settings.queue),
            pending: PendingTracker::new(settings.requests.max_pending),
            heartbeat: HeartbeatMonitor::new(settings.heartbeat.clone(), scheduler.clone()),
            health,
            settings,
            connector,
            scheduler,
            router,
            events,
            session_id,
            credentials: None,
            state: ConnectionState::Disconnected,
            error: None,
            attempt: 0,
            generation: 0,
            link: None,
            auth_timeout: None,
            backoff: None,
            status_tx,
        };
        (manager, outputs)
    }

    /// Run until shutdown or until every handle is gone.
    pub(crate) async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        match &self.url {
            Ok(url) => debug!(session_id = %self.session_id, url = %url, "session loop started"),
            Err(e) => warn!(
                session_id = %self.session_id,
                error = %e,
                "session loop started without a valid endpoint"
            ),
        }
        self.publish_status();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    None | Some(Event::Command(Command::Shutdown)) => break,
                    Some(event) => self.handle_event(event),
                },
                link_event = recv_link(self.link.as_mut()) => {
                    self.handle_link_event(link_event);
                }
            }
            self.publish_status();
        }
        self.teardown();
        debug!(session_id = %self.session_id, "session loop stopped");
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Command(command) => self.handle_command(command),
            Event::Opened { generation, result } => self.handle_opened(generation, result),
            Event::Timer(timer) => self.handle_timer(timer),
        }
    }

    // ── Commands ────────────────────────────────────────────────────────

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => {
                let _ = reply.send(self.connect());
            }
            Command::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
            Command::Send {
                envelope,
                options,
                responder,
            } => self.send(envelope, options, responder),
            Command::SetCredentials(credentials) => {
                debug!(user_id = %credentials.user_id, "credentials updated");
                self.credentials = Some(credentials);
            }
            // handled by the loop
            Command::Shutdown => {}
        }
    }

    fn connect(&mut self) -> Result<(), SessionError> {
        if self
            .credentials
            .as_ref()
            .is_none_or(|c| c.token.is_empty())
        {
            return Err(SessionError::MissingCredentials);
        }
        if let Err(e) = &self.url {
            return Err(SessionError::InvalidEndpoint(e.clone()));
        }
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => {
                debug!(state = %self.state, "connect ignored");
            }
            ConnectionState::Reconnecting => {
                self.cancel_backoff();
                self.open_link();
            }
            ConnectionState::Disconnected | ConnectionState::Error => {
                self.attempt = 0;
                self.error = None;
                self.open_link();
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        let cancelled = self.scheduler.cancel_group(TaskGroup::Transport);
        self.auth_timeout = None;
        self.backoff = None;
        if let Some(link) = self.link.take() {
            let _ = link.send(Frame::Close(NORMAL_CLOSE));
        }
        self.heartbeat.stop();
        let failed = self.pending.fail_all(&ResponseError::ConnectionClosed);
        let dropped = self.queue.drain();
        let dropped_count = dropped.len();
        for entry in dropped {
            if let Some(responder) = entry.responder {
                let _ = responder.send(Err(ResponseError::Dropped));
            }
        }
        self.attempt = 0;
        self.error = None;
        self.generation += 1;
        self.set_state(ConnectionState::Disconnected);
        info!(
            cancelled_timers = cancelled,
            failed_requests = failed,
            dropped_messages = dropped_count,
            "disconnected"
        );
    }

    fn send(&mut self, envelope: Envelope, options: SendOptions, responder: Option<Responder>) {
        if self.state.is_connected() && self.link.is_some() {
            self.transmit(envelope, &options, responder);
            return;
        }
        debug!(message_type = %envelope.message_type, id = %envelope.id, "queueing while not connected");
        let entry = QueueEntry {
            envelope,
            options,
            responder,
        };
        match self.queue.push(entry) {
            PushOutcome::Queued => {}
            PushOutcome::Evicted(old) => {
                warn!(
                    id = %old.envelope.id,
                    message_type = %old.envelope.message_type,
                    limit = self.queue.capacity(),
                    "outbound queue full, dropped oldest message"
                );
                fail_responder(old.responder, ResponseError::Dropped);
            }
            PushOutcome::Rejected(new) => {
                warn!(
                    id = %new.envelope.id,
                    message_type = %new.envelope.message_type,
                    limit = self.queue.capacity(),
                    "outbound queue full, rejected message"
                );
                fail_responder(new.responder, ResponseError::Dropped);
            }
        }
    }

    /// Put an envelope on the wire, tracking it if a response is expected.
    fn transmit(&mut self, envelope: Envelope, options: &SendOptions, responder: Option<Responder>) {
        let tracked = if options.expect_response {
            if !self.pending.has_capacity() {
                let limit = self.pending.limit();
                warn!(id = %envelope.id, limit, "too many pending requests, not sending");
                fail_responder(responder, ResponseError::Overloaded { limit });
                return;
            }
            responder
        } else {
            // nothing will resolve it; let the waiter see a closed channel
            drop(responder);
            None
        };

        let json = match envelope.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!(id = %envelope.id, error = %e, "failed to encode envelope");
                fail_responder(tracked, ResponseError::Dropped);
                return;
            }
        };
        let sent = self.link.as_ref().is_some_and(|l| l.send(Frame::Text(json)));
        if !sent {
            warn!(id = %envelope.id, "link gone while sending");
            fail_responder(tracked, ResponseError::ConnectionClosed);
            return;
        }
        debug!(message_type = %envelope.message_type, id = %envelope.id, "sent");

        if let Some(responder) = tracked {
            let timeout = options
                .timeout
                .unwrap_or_else(|| self.settings.requests.timeout());
            let retries = options.retries.unwrap_or(self.settings.requests.retries);
            let id = envelope.id.clone();
            let events = self.events.clone();
            let handle = self.scheduler.schedule(
                TaskGroup::Transport,
                RESPONSE_TIMEOUT_LABEL,
                timeout,
                move || emit(&events, Event::Timer(TimerEvent::ResponseTimeout { id })),
            );
            self.pending.register(envelope, handle, retries, responder);
        }
    }

    // ── Link lifecycle ──────────────────────────────────────────────────

    fn open_link(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        self.link = None;
        self.set_state(ConnectionState::Connecting);

        let (Some(events), Ok(url)) = (self.events.upgrade(), self.url.clone()) else {
            return;
        };
        let connector = Arc::clone(&self.connector);
        // a blackholed connect must not park the session in Connecting
        let limit = self.settings.connection.auth_timeout();
        info!(url = %url, attempt = self.attempt, "opening connection");
        drop(tokio::spawn(async move {
            let result = match tokio::time::timeout(limit, connector.open(&url)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Connect {
                    url,
                    reason: format!("timed out after {}ms", limit.as_millis()),
                }),
            };
            let _ = events.send(Event::Opened { generation, result });
        }));
    }

    fn handle_opened(&mut self, generation: u64, result: Result<Link, TransportError>) {
        if generation != self.generation || self.state != ConnectionState::Connecting {
            debug!(generation, current = self.generation, "discarding stale open");
            if let Ok(link) = result {
                let _ = link.send(Frame::Close(NORMAL_CLOSE));
            }
            return;
        }

        let link = match result {
            Ok(link) => link,
            Err(e) => {
                warn!(error = %e, attempt = self.attempt, "connection failed");
                self.error = Some(e.to_string());
                self.on_link_lost(ABNORMAL_CLOSE, &e.to_string());
                return;
            }
        };

        let Some(auth) = self.auth_envelope() else {
            // credentials were checked on connect and never cleared
            error!("credentials missing at handshake");
            let _ = link.send(Frame::Close(NORMAL_CLOSE));
            self.set_state(ConnectionState::Error);
            self.error = Some(SessionError::MissingCredentials.to_string());
            return;
        };
        match auth.to_json() {
            Ok(json) => {
                let _ = link.send(Frame::Text(json));
            }
            Err(e) => error!(error = %e, "failed to encode auth envelope"),
        }
        self.link = Some(link);

        let events = self.events.clone();
        self.auth_timeout = Some(self.scheduler.schedule(
            TaskGroup::Transport,
            AUTH_TIMEOUT_LABEL,
            self.settings.connection.auth_timeout(),
            move || emit(&events, Event::Timer(TimerEvent::AuthTimeout { generation })),
        ));
        debug!(session_id = %self.session_id, "link open, awaiting auth");
    }

    fn auth_envelope(&self) -> Option<Envelope> {
        let credentials = self.credentials.as_ref()?;
        let payload = payload_from(json!({
            "token": credentials.token,
            "userId": credentials.user_id,
            "sessionId": self.session_id,
        }))
        .ok()?;
        Some(Envelope::new(MessageType::Auth, payload))
    }

    /// The link closed, failed to open, or was abandoned.
    fn on_link_lost(&mut self, code: u16, reason: &str) {
        self.link = None;
        self.cancel_auth_timeout();
        self.heartbeat.stop();
        let failed = self.pending.fail_all(&ResponseError::ConnectionClosed);
        if failed > 0 {
            debug!(failed, "failed pending requests on close");
        }

        if matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::Error
        ) {
            return;
        }

        if self.settings.connection.is_clean_close(code) {
            info!(code, reason, "connection closed cleanly");
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        if self.settings.retry.allows(self.attempt) {
            self.attempt += 1;
            let delay = self.settings.retry.delay_for(self.attempt, rand::random::<f64>());
            let generation = self.generation;
            let events = self.events.clone();
            self.cancel_backoff();
            self.backoff = Some(self.scheduler.schedule(
                TaskGroup::Transport,
                BACKOFF_LABEL,
                delay,
                move || emit(&events, Event::Timer(TimerEvent::Backoff { generation })),
            ));
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            warn!(code, reason, attempt = self.attempt, delay_ms, "connection lost, reconnecting");
            self.set_state(ConnectionState::Reconnecting);
        } else {
            error!(code, reason, attempts = self.attempt, "giving up on reconnection");
            self.error = Some(RETRIES_EXHAUSTED.to_string());
            self.set_state(ConnectionState::Error);
        }
    }

    fn handle_link_event(&mut self, event: Option<LinkEvent>) {
        match event {
            Some(LinkEvent::Text(text)) => self.handle_inbound(&text),
            Some(LinkEvent::Closed { code, reason }) => self.on_link_lost(code, &reason),
            None => self.on_link_lost(ABNORMAL_CLOSE, "link dropped"),
        }
    }

    // ── Inbound routing ─────────────────────────────────────────────────

    fn handle_inbound(&mut self, text: &str) {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => Arc::new(envelope),
            Err(e) => {
                warn!(error = %e, len = text.len(), "dropping unparseable envelope");
                return;
            }
        };
        self.router.record(&envelope);

        if envelope.message_type == MessageType::HeartbeatAck {
            let _ = self.heartbeat.acknowledge(&envelope);
            return;
        }

        if envelope.response_to.is_some() {
            let _ = self.pending.resolve(&envelope);
        }

        let _ = self.router.dispatch(&envelope);

        if envelope.message_type.is_system() {
            self.handle_system(&envelope);
        } else {
            self.router.publish(envelope);
        }
    }

    fn handle_system(&mut self, envelope: &Envelope) {
        match envelope.message_type {
            MessageType::AuthSuccess => self.on_auth_success(),
            MessageType::AuthFailed => {
                let reason = message_of(envelope).unwrap_or("authentication failed");
                self.on_auth_failed(reason);
            }
            MessageType::Error => {
                let message = message_of(envelope).unwrap_or("server error");
                warn!(message, "server reported error");
                self.error = Some(message.to_string());
            }
            MessageType::Reconnect => {
                info!("server requested reconnect");
                if let Some(link) = self.link.take() {
                    let _ = link.send(Frame::Close(SERVICE_RESTART));
                }
                self.on_link_lost(SERVICE_RESTART, "server requested reconnect");
            }
            other => debug!(message_type = %other, "no system action"),
        }
    }

    fn on_auth_success(&mut self) {
        if self.state != ConnectionState::Connecting || self.link.is_none() {
            debug!(state = %self.state, "unexpected AUTH_SUCCESS ignored");
            return;
        }
        self.cancel_auth_timeout();
        self.attempt = 0;
        self.error = None;
        self.set_state(ConnectionState::Connected);

        let queued = self.queue.drain();
        if !queued.is_empty() {
            info!(count = queued.len(), "flushing outbound queue");
        }
        for entry in queued {
            self.transmit(entry.envelope, &entry.options, entry.responder);
        }

        let events = self.events.clone();
        self.heartbeat
            .start(move || emit(&events, Event::Timer(TimerEvent::HeartbeatTick)));
    }

    fn on_auth_failed(&mut self, reason: &str) {
        error!(reason, "authentication rejected");
        self.cancel_auth_timeout();
        self.cancel_backoff();
        if let Some(link) = self.link.take() {
            let _ = link.send(Frame::Close(NORMAL_CLOSE));
        }
        self.heartbeat.stop();
        let _ = self.pending.fail_all(&ResponseError::ConnectionClosed);
        self.error = Some(reason.to_string());
        self.set_state(ConnectionState::Error);
    }

    // ── Timers ──────────────────────────────────────────────────────────

    fn handle_timer(&mut self, timer: TimerEvent) {
        match timer {
            TimerEvent::Backoff { generation } => {
                self.backoff = None;
                if generation == self.generation && self.state == ConnectionState::Reconnecting {
                    self.open_link();
                }
            }
            TimerEvent::AuthTimeout { generation } => {
                self.auth_timeout = None;
                if generation == self.generation
                    && self.state == ConnectionState::Connecting
                    && self.link.is_some()
                {
                    warn!(
                        timeout_ms = self.settings.connection.auth_timeout_ms,
                        "no auth response, closing link"
                    );
                    if let Some(link) = self.link.take() {
                        let _ = link.send(Frame::Close(AUTH_TIMEOUT_CLOSE));
                    }
                    self.on_link_lost(AUTH_TIMEOUT_CLOSE, "authentication timed out");
                }
            }
            TimerEvent::HeartbeatTick => self.send_heartbeat(),
            TimerEvent::HeartbeatWatchdog { ping_id } => {
                let _ = self.heartbeat.watchdog_expired(&ping_id);
            }
            TimerEvent::ResponseTimeout { id } => {
                if self.pending.expire(&id) {
                    warn!(id = %id, "request timed out");
                }
            }
        }
    }

    fn send_heartbeat(&mut self) {
        if !self.state.is_connected() {
            return;
        }
        let events = self.events.clone();
        let ping = self.heartbeat.ping(move |ping_id| {
            emit(&events, Event::Timer(TimerEvent::HeartbeatWatchdog { ping_id }));
        });
        match ping.to_json() {
            Ok(json) => {
                let _ = self.link.as_ref().map(|l| l.send(Frame::Text(json)));
            }
            Err(e) => error!(error = %e, "failed to encode heartbeat"),
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "connection state changed");
            self.state = next;
        }
    }

    fn cancel_auth_timeout(&mut self) {
        if let Some(handle) = self.auth_timeout.take() {
            let _ = handle.cancel();
        }
    }

    fn cancel_backoff(&mut self) {
        if let Some(handle) = self.backoff.take() {
            let _ = handle.cancel();
        }
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            error: self.error.clone(),
            latency_ms: self.heartbeat.latency_ms(),
            reconnect_attempt: self.attempt,
            queued: self.queue.len(),
            pending: self.pending.len(),
        }
    }

    fn publish_status(&mut self) {
        let status = self.status();
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status.clone();
                true
            }
        });
        if changed {
            let _ = self.health.observe(&status);
        }
    }

    fn teardown(&mut self) {
        let _ = self.scheduler.cancel_all();
        if let Some(link) = self.link.take() {
            let _ = link.send(Frame::Close(NORMAL_CLOSE));
        }
        let _ = self.pending.fail_all(&ResponseError::SessionClosed);
        for entry in self.queue.drain() {
            fail_responder(entry.responder, ResponseError::SessionClosed);
        }
        self.heartbeat.stop();
        self.set_state(ConnectionState::Disconnected);
        self.publish_status();
    }
}

async fn recv_link(link: Option<&mut Link>) -> Option<LinkEvent> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => std::future::pending().await,
    }
}

fn emit(events: &mpsc::WeakUnboundedSender<Event>, event: Event) {
    if let Some(tx) = events.upgrade() {
        let _ = tx.send(event);
    }
}

fn fail_responder(responder: Option<Responder>, error: ResponseError) {
    if let Some(responder) = responder {
        let _ = responder.send(Err(error));
    }
}

fn message_of(envelope: &Envelope) -> Option<&str> {
    envelope
        .payload_str("message")
        .or_else(|| envelope.payload_str("reason"))
}
