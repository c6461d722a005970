//! Shared harness: a session authenticated against the in-memory server.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tether_client::transport::{MemoryPeer, MemoryServer, memory_pair};
use tether_client::{ConnectionState, RealtimeSession};
use tether_core::{Envelope, MessageType, Payload};
use tether_features::{AlertSink, Notification};
use tether_settings::TetherSettings;
use tokio::sync::broadcast;

pub struct Harness {
    pub session: RealtimeSession,
    pub server: MemoryServer,
    pub peer: MemoryPeer,
    events: broadcast::Receiver<Arc<Envelope>>,
}

impl Harness {
    pub async fn connected() -> Self {
        let mut settings = TetherSettings::default();
        settings.heartbeat.interval_ms = 3_600_000;
        let (connector, mut server) = memory_pair();
        let session = RealtimeSession::with_connector(settings, connector);
        session.set_credentials("token-abc", "me").unwrap();
        session.connect().await.unwrap();

        let mut peer = server.accept().await.unwrap();
        let auth = peer.recv_envelope().await.unwrap();
        assert!(peer.send(&Envelope::reply(
            MessageType::AuthSuccess,
            Payload::new(),
            &auth.id
        )));
        session.wait_for_state(ConnectionState::Connected).await.unwrap();
        let events = session.events();
        Self {
            session,
            server,
            peer,
            events,
        }
    }

    /// Push an envelope and wait until the session has dispatched it.
    pub async fn deliver(&mut self, envelope: Envelope) -> Envelope {
        assert!(self.peer.send(&envelope));
        loop {
            let seen = self.events.recv().await.unwrap();
            if seen.id == envelope.id {
                return envelope;
            }
        }
    }

    pub async fn push(&mut self, message_type: MessageType, payload: Value) -> Envelope {
        let payload = tether_core::protocol::payload_from(payload).unwrap();
        self.deliver(Envelope::new(message_type, payload)).await
    }

    /// Next non-heartbeat envelope the client sent.
    pub async fn next_sent(&mut self) -> Envelope {
        loop {
            let env = self.peer.recv_envelope().await.unwrap();
            if env.message_type != MessageType::Heartbeat {
                return env;
            }
        }
    }
}

/// Let spawned tasks run to their next await point.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AlertCall {
    Show(String),
    Dismiss(String),
}

#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<AlertCall>>,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<AlertCall> {
        self.calls.lock().clone()
    }
}

impl AlertSink for RecordingSink {
    fn show(&self, notification: &Notification) {
        self.calls.lock().push(AlertCall::Show(notification.id.clone()));
    }

    fn dismiss(&self, notification_id: &str) {
        self.calls
            .lock()
            .push(AlertCall::Dismiss(notification_id.to_string()));
    }
}
