//! Connection and task status fan-out.
//!
//! Local observers subscribe to a `broadcast` channel of [`AgentEvent`]s.
//! Connection status events are also recorded by every registered
//! [`StatusSink`]; task events are local only.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use basset_core::now_millis;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::dispatch::tasks::TaskStatus;

/// Default capacity of the local event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Observable connection status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// A dial started.
    Connecting,
    /// The connection is open.
    Connected,
    /// The connection closed.
    Disconnected,
    /// Terminal: rejected or out of reconnect attempts.
    ConnectionFailed,
}

impl ConnectionStatus {
    /// Wire name, e.g. `"connection_failed"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::ConnectionFailed => "connection_failed",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published connection status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// The status.
    pub status: ConnectionStatus,
    /// Status-specific detail (url, attempt, close code, ...).
    pub data: Value,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Task transition kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    /// Handler started.
    Started,
    /// Handler returned a result.
    Completed,
    /// Handler failed or was orphaned.
    Failed,
    /// Handler missed its deadline.
    TimedOut,
}

impl From<TaskStatus> for TaskEventKind {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Running => Self::Started,
            TaskStatus::Completed => Self::Completed,
            TaskStatus::Failed => Self::Failed,
            TaskStatus::TimedOut => Self::TimedOut,
        }
    }
}

/// One task transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Correlation identifier.
    pub command_id: String,
    /// Wire name of the command type.
    pub command_type: String,
    /// Transition.
    pub event: TaskEventKind,
    /// Failure text, for failed and timed-out tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl TaskEvent {
    /// Event stamped with the current time.
    pub fn new(
        command_id: impl Into<String>,
        command_type: impl Into<String>,
        event: TaskEventKind,
        error: Option<String>,
    ) -> Self {
        Self {
            command_id: command_id.into(),
            command_type: command_type.into(),
            event,
            error,
            timestamp: now_millis(),
        }
    }
}

/// Everything local subscribers receive.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Connection status change.
    Status(StatusEvent),
    /// Task transition.
    Task(TaskEvent),
}

// ─────────────────────────────────────────────────────────────────────────────
// Sinks
// ─────────────────────────────────────────────────────────────────────────────

/// Durable recipient of connection status events.
///
/// Called on the engine's event loop, so implementations must not block.
pub trait StatusSink: Send + Sync {
    /// Record `event`. Failures are logged and never stop the engine.
    fn record(&self, event: &StatusEvent) -> io::Result<()>;
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryStatusSink {
    events: Mutex<Vec<StatusEvent>>,
}

impl MemoryStatusSink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events, oldest first.
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().clone()
    }

    /// Recorded statuses, oldest first.
    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.events.lock().iter().map(|e| e.status).collect()
    }
}

impl StatusSink for MemoryStatusSink {
    fn record(&self, event: &StatusEvent) -> io::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Writes the latest event to a JSON file, atomically.
///
/// Inside a tokio runtime the write runs on the blocking pool and `record`
/// returns immediately; write failures are then logged. Outside a runtime it
/// writes inline. Writes are sequenced, so an older event never replaces a
/// newer one on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStatusSink {
    path: PathBuf,
    order: Arc<WriteOrder>,
}

#[derive(Debug, Default)]
struct WriteOrder {
    issued: AtomicU64,
    written: Mutex<u64>,
}

impl JsonFileStatusSink {
    /// Sink writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            order: Arc::default(),
        }
    }

    /// Target file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back the last recorded event.
    pub fn load(path: &Path) -> io::Result<StatusEvent> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(io::Error::other)
    }

    fn write(&self, seq: u64, json: &[u8]) -> io::Result<()> {
        let mut written = self.order.written.lock();
        if seq <= *written {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        *written = seq;
        Ok(())
    }
}

impl StatusSink for JsonFileStatusSink {
    fn record(&self, event: &StatusEvent) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(event).map_err(io::Error::other)?;
        let seq = self.order.issued.fetch_add(1, Ordering::Relaxed) + 1;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return self.write(seq, &json);
        };
        let sink = self.clone();
        drop(runtime.spawn_blocking(move || {
            if let Err(e) = sink.write(seq, &json) {
                warn!(path = %sink.path.display(), error = %e, "status file write failed");
            }
        }));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Broadcaster
// ─────────────────────────────────────────────────────────────────────────────

/// Publishes status and task events.
pub struct StatusBroadcaster {
    tx: broadcast::Sender<AgentEvent>,
    sinks: Vec<Arc<dyn StatusSink>>,
    last: Mutex<Option<StatusEvent>>,
}

impl StatusBroadcaster {
    /// Broadcaster with a local channel of `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            sinks: Vec::new(),
            last: Mutex::new(None),
        }
    }

    /// Add a durable sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    /// Publish a connection status to subscribers and sinks.
    pub fn publish(&self, status: ConnectionStatus, data: Value) -> StatusEvent {
        let event = StatusEvent {
            status,
            data,
            timestamp: now_millis(),
        };
        debug!(%status, "publishing status");
        *self.last.lock() = Some(event.clone());
        let _ = self.tx.send(AgentEvent::Status(event.clone()));
        for sink in &self.sinks {
            if let Err(e) = sink.record(&event) {
                warn!(%status, error = %e, "status sink failed");
            }
        }
        event
    }

    /// Publish a task transition to subscribers.
    pub fn publish_task(&self, event: TaskEvent) {
        let _ = self.tx.send(AgentEvent::Task(event));
    }

    /// The most recent connection status.
    pub fn last_status(&self) -> Option<StatusEvent> {
        self.last.lock().clone()
    }

    /// Current local subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
