//! Transport seam between the engine loop and the socket.
//!
//! A [`Connector`] dials the controller and hands back a [`TransportLink`]:
//! a pair of channels the event loop consumes. The loop never touches the
//! socket directly, so tests substitute [`memory::MemoryConnector`] for the
//! production [`ws::WsConnector`].

pub mod memory;
pub mod ws;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

/// Default capacity for the per-link frame channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Close code for an abnormal closure with no close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code for a normal, requested closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Frame written to the socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    /// JSON text frame.
    Text(String),
    /// Close handshake initiated by the agent.
    Close {
        /// Close code.
        code: u16,
        /// Human-readable reason.
        reason: String,
    },
}

/// Event read from the socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Inbound text frame.
    Message(String),
    /// The peer closed the connection, or the link ended.
    Close {
        /// Close code (1006 when no close frame was received).
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// Transport-level error; a `Close` follows.
    Error(String),
}

/// Transport failures. Never surfaced as a command failure.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The dial was refused or the handshake failed.
    #[error("connect failed: {0}")]
    Connect(String),
    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),
    /// The link is already closed.
    #[error("transport closed")]
    Closed,
    /// The dial did not complete in time.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
}

/// An established connection, as seen by the event loop.
#[derive(Debug)]
pub struct TransportLink {
    /// Frames to write to the socket.
    pub outbound: mpsc::Sender<OutboundFrame>,
    /// Events read from the socket. A closed channel means the link is gone.
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Dials the controller.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection to `url`.
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound channel
// ─────────────────────────────────────────────────────────────────────────────

/// Non-blocking writer over a link's outbound channel.
///
/// Frames that cannot be queued (channel full or closed) are counted and
/// dropped; the event loop never waits on the socket.
#[derive(Debug)]
pub struct OutboundChannel {
    tx: mpsc::Sender<OutboundFrame>,
    dropped: AtomicU64,
}

impl OutboundChannel {
    /// Wrap a link's outbound sender.
    pub fn new(tx: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue a frame. Returns `false` and counts a drop if it cannot be queued.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize `value` and queue it as a text frame.
    pub fn send_json<T: Serialize>(&self, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.send(OutboundFrame::Text(json)),
            Err(_) => false,
        }
    }

    /// Frames dropped on this channel.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn send_json_queues_text_frame() {
        let (tx, mut rx) = mpsc::channel(4);
        let chan = OutboundChannel::new(tx);
        assert!(chan.send_json(&json!({"type": "heartbeat"})));
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame, OutboundFrame::Text(r#"{"type":"heartbeat"}"#.into()));
    }

    #[test]
    fn send_to_closed_channel_counts_drop() {
        let (tx, rx) = mpsc::channel(4);
        let chan = OutboundChannel::new(tx);
        drop(rx);
        assert!(!chan.send(OutboundFrame::Text("x".into())));
        assert_eq!(chan.drop_count(), 1);
    }

    #[test]
    fn send_to_full_channel_counts_drop() {
        let (tx, _rx) = mpsc::channel(1);
        let chan = OutboundChannel::new(tx);
        assert!(chan.send(OutboundFrame::Text("a".into())));
        assert!(!chan.send(OutboundFrame::Text("b".into())));
        assert_eq!(chan.drop_count(), 1);
    }

    #[test]
    fn transport_error_display() {
        let err = TransportError::Timeout(Duration::from_secs(10));
        assert_eq!(err.to_string(), "connect timed out after 10s");
        assert_eq!(
            TransportError::Connect("refused".into()).to_string(),
            "connect failed: refused"
        );
    }
}
