//! Session object and its cloneable handle.
//!
//! A [`RealtimeSession`] is built once per authenticated login. It spawns the
//! connection manager loop and owns its task; dropping or shutting it down
//! cancels every timer it scheduled. Feature code receives a
//! [`SessionHandle`] by reference and talks to the loop through it.

use std::ops::Deref;
use std::sync::Arc;

use serde_json::Value;
use tether_core::protocol::payload_from;
use tether_core::{Envelope, EnvelopeId, MessageType, SessionId, UserId};
use tether_settings::TetherSettings;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::errors::SessionError;
use crate::health::HealthReport;
use crate::manager::{Command, ConnectionManager, Credentials, Event};
use crate::pending::{PendingResponse, SendOptions};
use crate::router::{Router, Subscription};
use crate::scheduler::{Scheduler, TaskGroup};
use crate::state::{ConnectionState, SessionStatus};
use crate::transport::{Connector, WsConnector};

/// Result of a successful [`SessionHandle::send`].
#[derive(Debug)]
pub struct SendReceipt {
    /// ID stamped on the outbound envelope.
    pub id: EnvelopeId,
    /// Awaitable response, when one was requested.
    pub response: Option<PendingResponse>,
}

struct Shared {
    events: mpsc::UnboundedSender<Event>,
    status: watch::Receiver<SessionStatus>,
    health: watch::Receiver<HealthReport>,
    router: Arc<Router>,
    scheduler: Arc<Scheduler>,
    settings: Arc<TetherSettings>,
    session_id: SessionId,
}

/// Cloneable access to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Shared>,
}

/// One realtime session: the manager loop plus its handle.
pub struct RealtimeSession {
    handle: SessionHandle,
    task: Option<JoinHandle<()>>,
}

impl RealtimeSession {
    /// Start a session that connects over WebSocket.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(settings: TetherSettings) -> Self {
        Self::with_connector(settings, WsConnector)
    }

    /// Start a session over a custom transport.
    pub fn with_connector<C: Connector>(settings: TetherSettings, connector: C) -> Self {
        let settings = Arc::new(settings);
        let scheduler = Scheduler::new();
        let router = Router::new(&settings.router);
        let session_id = SessionId::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let (manager, outputs) = ConnectionManager::new(
            Arc::clone(&settings),
            Arc::new(connector),
            Arc::clone(&scheduler),
            Arc::clone(&router),
            events_tx.downgrade(),
            session_id.clone(),
        );
        let task = tokio::spawn(manager.run(events_rx));
        debug!(session_id = %session_id, "session created");

        Self {
            handle: SessionHandle {
                inner: Arc::new(Shared {
                    events: events_tx,
                    status: outputs.status,
                    health: outputs.health,
                    router,
                    scheduler,
                    settings,
                    session_id,
                }),
            },
            task: Some(task),
        }
    }

    /// A handle to pass to feature code.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Stop the loop, closing the link and cancelling every timer.
    pub async fn shutdown(mut self) {
        let _ = self.handle.scheduler().cancel_all();
        let _ = self.handle.inner.events.send(Event::Command(Command::Shutdown));
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Deref for RealtimeSession {
    type Target = SessionHandle;

    fn deref(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.handle.scheduler().cancel_all();
            let _ = self.handle.inner.events.send(Event::Command(Command::Shutdown));
        }
    }
}

impl SessionHandle {
    /// Supply the bearer credential used for every (re)connection.
    pub fn set_credentials(
        &self,
        token: impl Into<String>,
        user_id: impl Into<UserId>,
    ) -> Result<(), SessionError> {
        self.command(Command::SetCredentials(Credentials {
            token: token.into(),
            user_id: user_id.into(),
        }))
    }

    /// Start connecting. A no-op while connecting or connected.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Connect { reply })?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Close cleanly from any state.
    ///
    /// Transport timers are cancelled before this returns control to the
    /// loop; queued messages are dropped and pending requests fail.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let _ = self.inner.scheduler.cancel_group(TaskGroup::Transport);
        let (reply, rx) = oneshot::channel();
        self.command(Command::Disconnect { reply })?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Send a message, or queue it until the connection authenticates.
    ///
    /// `payload` must be a JSON object (or `null` for an empty one).
    pub fn send(
        &self,
        message_type: MessageType,
        payload: Value,
        options: SendOptions,
    ) -> Result<SendReceipt, SessionError> {
        let envelope = Envelope::new(message_type, payload_from(payload)?);
        let id = envelope.id.clone();
        let (responder, response) = if options.expect_response {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(PendingResponse::new(id.clone(), rx)))
        } else {
            (None, None)
        };
        self.command(Command::Send {
            envelope,
            options,
            responder,
        })?;
        Ok(SendReceipt { id, response })
    }

    /// Send and wait for the matching response.
    pub async fn request(
        &self,
        message_type: MessageType,
        payload: Value,
        options: SendOptions,
    ) -> Result<Arc<Envelope>, SessionError> {
        let options = SendOptions {
            expect_response: true,
            ..options
        };
        let receipt = self.send(message_type, payload, options)?;
        let response = receipt.response.ok_or(SessionError::SessionClosed)?;
        Ok(response.wait().await?)
    }

    /// Register the handler for `message_type`, replacing any previous one.
    pub fn subscribe<F>(&self, message_type: MessageType, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.inner.router.subscribe(message_type, handler)
    }

    /// Every non-system inbound envelope, whether or not a handler exists.
    pub fn events(&self) -> broadcast::Receiver<Arc<Envelope>> {
        self.inner.router.events()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.status.borrow().state
    }

    /// Current status snapshot.
    pub fn status(&self) -> SessionStatus {
        self.inner.status.borrow().clone()
    }

    /// Subscribe to status changes.
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.clone()
    }

    /// Wait until the state equals `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), SessionError> {
        let mut rx = self.watch_status();
        let _ = rx
            .wait_for(|s| s.state == target)
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        Ok(())
    }

    /// Current health report.
    pub fn health(&self) -> HealthReport {
        self.inner.health.borrow().clone()
    }

    /// Subscribe to health changes.
    pub fn watch_health(&self) -> watch::Receiver<HealthReport> {
        self.inner.health.clone()
    }

    /// Recent inbound envelopes, oldest first.
    pub fn history(&self) -> Vec<Arc<Envelope>> {
        self.inner.router.history()
    }

    /// Most recent inbound envelope.
    pub fn last_message(&self) -> Option<Arc<Envelope>> {
        self.inner.router.last_message()
    }

    /// The session's timer registry.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.inner.scheduler
    }

    /// Settings the session was built with.
    pub fn settings(&self) -> &TetherSettings {
        &self.inner.settings
    }

    /// Identifier sent with every AUTH.
    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    fn command(&self, command: Command) -> Result<(), SessionError> {
        self.inner
            .events
            .send(Event::Command(command))
            .map_err(|_| SessionError::SessionClosed)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.inner.session_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for RealtimeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSession")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
