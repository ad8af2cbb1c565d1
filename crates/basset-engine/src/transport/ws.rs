//! WebSocket transport over `tokio-tungstenite`.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, warn};

use super::{
    ABNORMAL_CLOSURE, Connector, DEFAULT_CHANNEL_CAPACITY, OutboundFrame, TransportError,
    TransportEvent, TransportLink,
};

/// Close code reported when the peer sent a close frame without a code.
const NO_STATUS_RECEIVED: u16 = 1005;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsRead = futures::stream::SplitStream<WsStream>;
type WsWrite = futures::stream::SplitSink<WsStream, Message>;

/// Production [`Connector`]: dials with `connect_async` and pumps frames
/// through a reader task and a writer task.
#[derive(Clone, Debug)]
pub struct WsConnector {
    connect_timeout: Duration,
    channel_capacity: usize,
}

impl WsConnector {
    /// Connector with the given handshake deadline.
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Override the per-link channel capacity.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError> {
        let (ws, _resp) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| TransportError::Timeout(self.connect_timeout))?
                .map_err(|e| TransportError::Connect(e.to_string()))?;
        debug!(url, "websocket handshake complete");

        let (write, read) = ws.split();
        let (out_tx, out_rx) = mpsc::channel(self.channel_capacity);
        let (in_tx, in_rx) = mpsc::channel(self.channel_capacity);

        drop(tokio::spawn(write_loop(write, out_rx)));
        drop(tokio::spawn(read_loop(read, in_tx)));

        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Drain outbound frames into the socket until the channel closes or a
/// close frame has been written.
async fn write_loop(mut write: WsWrite, mut frames: mpsc::Receiver<OutboundFrame>) {
    while let Some(frame) = frames.recv().await {
        match frame {
            OutboundFrame::Text(text) => {
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    warn!(error = %e, "websocket write failed");
                    break;
                }
            }
            OutboundFrame::Close { code, reason } => {
                let close = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.into(),
                };
                if let Err(e) = write.send(Message::Close(Some(close))).await {
                    debug!(error = %e, "close frame not delivered");
                }
                return;
            }
        }
    }
    let _ = write.close().await;
}

/// Forward socket reads as [`TransportEvent`]s. Always ends with exactly
/// one `Close` event unless the engine has already dropped the link.
async fn read_loop(mut read: WsRead, events: mpsc::Sender<TransportEvent>) {
    while let Some(msg) = read.next().await {
        let event = match msg {
            Ok(Message::Text(text)) => TransportEvent::Message(text.as_str().to_owned()),
            Ok(Message::Close(frame)) => {
                let (code, reason) = frame.map_or((NO_STATUS_RECEIVED, String::new()), |f| {
                    (u16::from(f.code), f.reason.as_str().to_owned())
                });
                let _ = events.send(TransportEvent::Close { code, reason }).await;
                return;
            }
            Ok(Message::Binary(data)) => {
                debug!(bytes = data.len(), "ignoring binary frame");
                continue;
            }
            Ok(_) => continue,
            Err(e) => {
                let message = e.to_string();
                let _ = events.send(TransportEvent::Error(message.clone())).await;
                let _ = events
                    .send(TransportEvent::Close {
                        code: ABNORMAL_CLOSURE,
                        reason: message,
                    })
                    .await;
                return;
            }
        };
        if events.send(event).await.is_err() {
            return;
        }
    }
    let _ = events
        .send(TransportEvent::Close {
            code: ABNORMAL_CLOSURE,
            reason: "stream ended".into(),
        })
        .await;
}
