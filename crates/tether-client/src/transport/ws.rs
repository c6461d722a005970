//! WebSocket connector over `tokio-tungstenite`.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use super::{ABNORMAL_CLOSE, Connector, Frame, Link, LinkEvent};
use crate::errors::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens real WebSocket links. `wss://` requires the `tls` feature.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<Link, TransportError> {
        let (ws, response) = connect_async(url).await.map_err(|e| match e {
            tokio_tungstenite::tungstenite::Error::Io(io) => TransportError::Io(io),
            other => TransportError::Connect {
                url: url.to_string(),
                reason: other.to_string(),
            },
        })?;
        debug!(url, status = %response.status(), "websocket open");

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        drop(tokio::spawn(pump(ws, out_rx, in_tx)));

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Shuttle frames between the socket and the link channels until either
/// side closes.
async fn pump(
    ws: WsStream,
    mut out_rx: mpsc::UnboundedReceiver<Frame>,
    in_tx: mpsc::UnboundedSender<LinkEvent>,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            frame = out_rx.recv() => {
                match frame {
                    Some(Frame::Text(text)) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            let _ = in_tx.send(LinkEvent::Closed {
                                code: ABNORMAL_CLOSE,
                                reason: e.to_string(),
                            });
                            break;
                        }
                    }
                    Some(Frame::Close(code)) => {
                        let _ = sink.send(Message::Close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: "client closing".into(),
                        }))).await;
                        break;
                    }
                    None => {
                        // link dropped by the session
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx.send(LinkEvent::Text(text.as_str().to_owned())).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or((ABNORMAL_CLOSE, String::new()), |f| {
                            (u16::from(f.code), f.reason.as_str().to_owned())
                        });
                        let _ = in_tx.send(LinkEvent::Closed { code, reason });
                        break;
                    }
                    Some(Ok(other)) => {
                        trace!(kind = ?std::mem::discriminant(&other), "ignoring non-text frame");
                    }
                    Some(Err(e)) => {
                        let _ = in_tx.send(LinkEvent::Closed {
                            code: ABNORMAL_CLOSE,
                            reason: e.to_string(),
                        });
                        break;
                    }
                    None => {
                        let _ = in_tx.send(LinkEvent::Closed {
                            code: ABNORMAL_CLOSE,
                            reason: "stream ended".to_string(),
                        });
                        break;
                    }
                }
            }
        }
    }
}
