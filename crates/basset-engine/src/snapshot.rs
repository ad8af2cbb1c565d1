//! Point-in-time view of the engine, published on a `watch` channel.

use serde::Serialize;

use crate::connection::{Connection, ConnectionState};
use crate::dispatch::tasks::{Task, TaskCounts};

/// Everything an observer may want to know about the engine.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    /// The connection record.
    pub connection: Connection,
    /// Whether a reconnect timer is armed.
    pub reconnect_pending: bool,
    /// Whether the engine is in the terminal `connection_failed` state.
    pub terminal: bool,
    /// Running handlers.
    pub running: usize,
    /// Commands waiting for a slot.
    pub queued: usize,
    /// Retained tasks by status.
    pub task_counts: TaskCounts,
    /// Retained tasks, oldest first.
    pub tasks: Vec<Task>,
    /// Heartbeats written.
    pub heartbeats_sent: u64,
    /// Responses written.
    pub responses_sent: u64,
    /// Responses discarded because the connection was not open.
    pub responses_dropped: u64,
    /// Outbound frames the transport could not queue, across all links.
    pub frames_dropped: u64,
    /// Registered command types.
    pub commands: Vec<String>,
}

impl EngineSnapshot {
    /// Snapshot of an engine that has not started.
    pub fn initial(url: impl Into<String>, commands: Vec<String>) -> Self {
        Self {
            connection: Connection {
                state: ConnectionState::Disconnected,
                url: url.into(),
                reconnect_attempt: 0,
                last_close_code: None,
                last_error: None,
            },
            reconnect_pending: false,
            terminal: false,
            running: 0,
            queued: 0,
            task_counts: TaskCounts::default(),
            tasks: Vec::new(),
            heartbeats_sent: 0,
            responses_sent: 0,
            responses_dropped: 0,
            frames_dropped: 0,
            commands,
        }
    }

    /// Connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state
    }
}
