//! Engine configuration.

use std::time::Duration;

use basset_core::backoff::ReconnectPolicy;
use basset_settings::AgentSettings;

use crate::dispatch::RouterLimits;

/// Immutable engine configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Agent name sent in the connected announcement.
    pub agent_name: String,
    /// Agent version sent in the connected announcement.
    pub agent_version: String,
    /// Controller URL.
    pub endpoint_url: String,
    /// Reconnect backoff.
    pub reconnect: ReconnectPolicy,
    /// Close codes that end reconnection for good.
    pub permanent_close_codes: Vec<u16>,
    /// Deadline for a single dial.
    pub connect_timeout: Duration,
    /// How long to wait for the close handshake before giving up.
    pub close_timeout: Duration,
    /// Dispatch limits.
    pub limits: RouterLimits,
    /// Heartbeat cadence.
    pub heartbeat_interval: Duration,
    /// Task registry cap.
    pub max_retained_tasks: usize,
    /// Retention of finished tasks.
    pub task_retention: Duration,
    /// Cadence of the periodic task sweep.
    pub sweep_interval: Duration,
    /// Dial as soon as the engine starts.
    pub auto_connect: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&AgentSettings::default())
    }
}

impl From<&AgentSettings> for EngineConfig {
    fn from(settings: &AgentSettings) -> Self {
        let conn = &settings.connection;
        Self {
            agent_name: settings.name.clone(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            endpoint_url: conn.endpoint_url.clone(),
            reconnect: conn.reconnect_policy(),
            permanent_close_codes: conn.permanent_close_codes.clone(),
            connect_timeout: Duration::from_millis(conn.connect_timeout_ms),
            close_timeout: Duration::from_secs(2),
            limits: RouterLimits {
                command_timeout: Duration::from_millis(settings.commands.command_timeout_ms),
                max_concurrent: settings.commands.max_concurrent_commands,
                max_pending: settings.commands.max_pending_commands,
            },
            heartbeat_interval: Duration::from_millis(settings.heartbeat.interval_ms),
            max_retained_tasks: settings.tasks.max_queue_size,
            task_retention: Duration::from_millis(settings.tasks.retention_ms),
            sweep_interval: Duration::from_millis(settings.tasks.sweep_interval_ms.max(1)),
            auto_connect: conn.auto_connect,
        }
    }
}
