//! In-process transport.
//!
//! [`memory_pair`] returns a connector for the session and a server handle
//! for the other end. Each successful `open` hands the server a
//! [`MemoryPeer`] that sees exactly what the session sent and can push
//! envelopes back or close the link with any code.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tether_core::Envelope;
use tokio::sync::mpsc;

use super::{Connector, Frame, Link, LinkEvent};
use crate::errors::TransportError;

/// Create a connected connector/server pair.
pub fn memory_pair() -> (MemoryConnector, MemoryServer) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let refusals = Arc::new(AtomicUsize::new(0));
    let urls = Arc::new(Mutex::new(Vec::new()));
    (
        MemoryConnector {
            accept_tx,
            refusals: refusals.clone(),
            urls: urls.clone(),
        },
        MemoryServer {
            accept_rx,
            refusals,
            urls,
        },
    )
}

/// Session side of the in-memory transport.
#[derive(Clone, Debug)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    refusals: Arc<AtomicUsize>,
    urls: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, url: &str) -> Result<Link, TransportError> {
        self.urls.lock().push(url.to_string());

        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            from_client: out_rx,
            to_client: in_tx,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| TransportError::Connect {
                url: url.to_string(),
                reason: "server gone".to_string(),
            })?;

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Server side of the in-memory transport.
#[derive(Debug)]
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    refusals: Arc<AtomicUsize>,
    urls: Arc<Mutex<Vec<String>>>,
}

impl MemoryServer {
    /// Wait for the next opened link.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Take an already opened link, if any.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }

    /// Make the next `n` opens fail.
    pub fn refuse_next(&self, n: usize) {
        self.refusals.store(n, Ordering::SeqCst);
    }

    /// Every URL an open was attempted for.
    pub fn opened_urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }

    /// Number of open attempts so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.urls.lock().len()
    }
}

/// One accepted link, seen from the server.
#[derive(Debug)]
pub struct MemoryPeer {
    from_client: mpsc::UnboundedReceiver<Frame>,
    to_client: mpsc::UnboundedSender<LinkEvent>,
}

impl MemoryPeer {
    /// Next frame from the client. `None` once the client dropped the link.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Next frame parsed as an envelope.
    ///
    /// `None` on a close frame, an unparseable frame, or a dropped link.
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        match self.recv().await? {
            Frame::Text(text) => Envelope::parse(&text).ok(),
            Frame::Close(_) => None,
        }
    }

    /// Take a frame already sent, if any.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_client.try_recv().ok()
    }

    /// Push an envelope to the client.
    pub fn send(&self, envelope: &Envelope) -> bool {
        envelope
            .to_json()
            .is_ok_and(|json| self.to_client.send(LinkEvent::Text(json)).is_ok())
    }

    /// Push a raw text frame to the client.
    pub fn send_raw(&self, text: impl Into<String>) -> bool {
        self.to_client.send(LinkEvent::Text(text.into())).is_ok()
    }

    /// Close the link with `code`.
    pub fn close(self, code: u16) {
        let _ = self.to_client.send(LinkEvent::Closed {
            code,
            reason: String::new(),
        });
    }

    /// Whether the client still holds the link.
    pub fn is_open(&self) -> bool {
        !self.to_client.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tether_core::{MessageType, Payload};

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (connector, mut server) = memory_pair();
        let mut link = connector.open("ws://mem/ws").await.unwrap();
        let mut peer = server.accept().await.unwrap();

        let env = Envelope::new(MessageType::Message, Payload::new());
        assert!(link.send(Frame::Text(env.to_json().unwrap())));
        assert_eq!(peer.recv_envelope().await.unwrap().id, env.id);

        assert!(peer.send(&env));
        assert_matches!(link.inbound.recv().await, Some(LinkEvent::Text(_)));

        peer.close(4000);
        assert_matches!(
            link.inbound.recv().await,
            Some(LinkEvent::Closed { code: 4000, .. })
        );
        assert_eq!(server.opened_urls(), vec!["ws://mem/ws".to_string()]);
    }

    #[tokio::test]
    async fn refusals_are_counted_down() {
        let (connector, mut server) = memory_pair();
        server.refuse_next(2);
        assert!(connector.open("ws://mem/ws").await.is_err());
        assert!(connector.open("ws://mem/ws").await.is_err());
        assert!(connector.open("ws://mem/ws").await.is_ok());
        assert_eq!(server.attempts(), 3);
        assert!(server.try_accept().is_some());
        assert!(server.try_accept().is_none());
    }

    #[tokio::test]
    async fn dropping_link_is_visible_to_peer() {
        let (connector, mut server) = memory_pair();
        let link = connector.open("ws://mem/ws").await.unwrap();
        let mut peer = server.accept().await.unwrap();
        drop(link);
        assert!(peer.recv().await.is_none());
        assert!(!peer.is_open());
    }
}
