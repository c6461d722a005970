//! Transport seam.
//!
//! The session loop only sees a [`Link`]: a pair of channels carrying text
//! frames out and text frames or a close event in. [`Connector`]
//! implementations produce links: [`ws::WsConnector`] over a real WebSocket,
//! [`memory::MemoryConnector`] for tests and local tooling.

pub mod memory;
pub mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::TransportError;

pub use memory::{MemoryConnector, MemoryPeer, MemoryServer, memory_pair};
pub use ws::WsConnector;

/// Close code used when the link vanished without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;
/// Close code sent for an intentional client shutdown.
pub const NORMAL_CLOSE: u16 = 1000;
/// Close code sent when the server asked us to reconnect.
pub const SERVICE_RESTART: u16 = 1012;

/// Client-to-server frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// A serialized envelope.
    Text(String),
    /// Close the link with this code.
    Close(u16),
}

/// Server-to-client event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// A serialized envelope.
    Text(String),
    /// The link closed.
    Closed {
        /// Close code (1006 when none was received).
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
}

/// An open link to the server.
#[derive(Debug)]
pub struct Link {
    /// Frames to send.
    pub outbound: mpsc::UnboundedSender<Frame>,
    /// Frames and close events received.
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

impl Link {
    /// Queue a frame. Returns `false` if the link is gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.outbound.send(frame).is_ok()
    }
}

/// Opens links to a realtime endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a link to `url`.
    async fn open(&self, url: &str) -> Result<Link, TransportError>;
}
