//! In-memory transport for tests and embedders.
//!
//! Every accepted dial produces a [`MemoryPeer`], the controller side of
//! the link, delivered through the receiver returned by
//! [`MemoryConnector::new`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{
    Connector, DEFAULT_CHANNEL_CAPACITY, OutboundFrame, TransportError, TransportEvent,
    TransportLink,
};

/// What the next dial does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DialScript {
    /// Establish a link.
    Accept,
    /// Fail with a connect error.
    Refuse(String),
    /// Never complete.
    Hang,
}

/// Scripted [`Connector`].
pub struct MemoryConnector {
    script: Mutex<VecDeque<DialScript>>,
    fallback: DialScript,
    peers: mpsc::UnboundedSender<MemoryPeer>,
    dials: AtomicU32,
}

impl MemoryConnector {
    /// Connector that accepts every dial not otherwise scripted.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryPeer>) {
        Self::with_fallback(DialScript::Accept)
    }

    /// Connector whose unscripted dials behave like `fallback`.
    pub fn with_fallback(
        fallback: DialScript,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            peers,
            dials: AtomicU32::new(0),
        });
        (connector, rx)
    }

    /// Queue the outcome of the next unscripted dial.
    pub fn push(&self, outcome: DialScript) {
        self.script.lock().push_back(outcome);
    }

    /// Dials attempted so far.
    pub fn dial_count(&self) -> u32 {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError> {
        let _ = self.dials.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match outcome {
            DialScript::Accept => {
                let (out_tx, out_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
                let (in_tx, in_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
                let peer = MemoryPeer {
                    url: url.to_owned(),
                    frames: out_rx,
                    events: in_tx,
                };
                self.peers
                    .send(peer)
                    .map_err(|_| TransportError::Connect("no peer listener".into()))?;
                Ok(TransportLink {
                    outbound: out_tx,
                    inbound: in_rx,
                })
            }
            DialScript::Refuse(reason) => Err(TransportError::Connect(reason)),
            DialScript::Hang => std::future::pending().await,
        }
    }
}

/// Controller side of an in-memory link.
#[derive(Debug)]
pub struct MemoryPeer {
    /// URL the agent dialled.
    pub url: String,
    frames: mpsc::Receiver<OutboundFrame>,
    events: mpsc::Sender<TransportEvent>,
}

impl MemoryPeer {
    /// Deliver a text frame to the agent.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.events
            .send(TransportEvent::Message(text.into()))
            .await
            .is_ok()
    }

    /// Deliver a JSON frame to the agent.
    pub async fn send_json(&self, value: &Value) -> bool {
        self.send_text(value.to_string()).await
    }

    /// Close the link from the controller side.
    pub async fn close(&self, code: u16, reason: &str) -> bool {
        self.events
            .send(TransportEvent::Close {
                code,
                reason: reason.to_owned(),
            })
            .await
            .is_ok()
    }

    /// Report a transport error to the agent.
    pub async fn error(&self, message: &str) -> bool {
        self.events
            .send(TransportEvent::Error(message.to_owned()))
            .await
            .is_ok()
    }

    /// Next frame the agent wrote, or `None` once the agent dropped the link.
    pub async fn next_frame(&mut self) -> Option<OutboundFrame> {
        self.frames.recv().await
    }

    /// Next frame, if one is already queued.
    pub fn try_next_frame(&mut self) -> Option<OutboundFrame> {
        self.frames.try_recv().ok()
    }

    /// Next text frame parsed as JSON, skipping close frames.
    pub async fn next_json(&mut self) -> Option<Value> {
        loop {
            match self.frames.recv().await? {
                OutboundFrame::Text(text) => return serde_json::from_str(&text).ok(),
                OutboundFrame::Close { .. } => {}
            }
        }
    }

    /// Next Response frame, skipping heartbeats and announcements.
    pub async fn next_response(&mut self) -> Option<Value> {
        loop {
            let value = self.next_json().await?;
            if value.get("command_id").is_some() {
                return Some(value);
            }
        }
    }
}
