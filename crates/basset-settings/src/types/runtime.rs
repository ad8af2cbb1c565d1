//! Dispatch, heartbeat, task retention, logging, and status settings.
//!
//! Grouped here because each section is small and engine-runtime oriented.

use serde::{Deserialize, Serialize};

/// Command dispatch limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandSettings {
    /// Per-command deadline in milliseconds.
    pub command_timeout_ms: u64,
    /// Maximum simultaneously running commands.
    pub max_concurrent_commands: usize,
    /// Maximum commands waiting for a running slot.
    pub max_pending_commands: usize,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            command_timeout_ms: 30_000,
            max_concurrent_commands: 5,
            max_pending_commands: 1000,
        }
    }
}

/// Liveness heartbeat cadence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Interval between heartbeat frames in milliseconds.
    pub interval_ms: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self { interval_ms: 30_000 }
    }
}

/// Task registry retention.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskSettings {
    /// Maximum retained task records.
    pub max_queue_size: usize,
    /// How long finished tasks are kept, in milliseconds.
    pub retention_ms: u64,
    /// Interval of the periodic sweep in milliseconds.
    pub sweep_interval_ms: u64,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 50,
            retention_ms: 300_000,
            sweep_interval_ms: 60_000,
        }
    }
}

/// Logging output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Durable status output.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusSettings {
    /// File receiving the latest connection status, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_file: Option<String>,
}
