//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`,
//! so a settings file may name only the fields it wants to change.

mod connection;
mod runtime;

pub use connection::*;
pub use runtime::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the Basset agent.
///
/// Example settings file:
///
/// ```json
/// {
///   "connection": { "endpointUrl": "ws://10.0.0.5:8765/browser" },
///   "commands": { "maxConcurrentCommands": 8 }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Agent name reported in the connected announcement.
    pub name: String,
    /// Controller connection and reconnect policy.
    pub connection: ConnectionSettings,
    /// Command dispatch limits.
    pub commands: CommandSettings,
    /// Liveness heartbeat.
    pub heartbeat: HeartbeatSettings,
    /// Task registry retention.
    pub tasks: TaskSettings,
    /// Logging output.
    pub logging: LoggingSettings,
    /// Durable status output.
    pub status: StatusSettings,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: "basset-agent".to_string(),
            connection: ConnectionSettings::default(),
            commands: CommandSettings::default(),
            heartbeat: HeartbeatSettings::default(),
            tasks: TaskSettings::default(),
            logging: LoggingSettings::default(),
            status: StatusSettings::default(),
        }
    }
}

impl AgentSettings {
    /// Reject combinations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let conn = &self.connection;
        if conn.endpoint_url.trim().is_empty() {
            return Err(SettingsError::InvalidValue("endpointUrl is empty".into()));
        }
        if !(conn.endpoint_url.starts_with("ws://") || conn.endpoint_url.starts_with("wss://")) {
            return Err(SettingsError::InvalidValue(format!(
                "endpointUrl must use ws:// or wss://, got {}",
                conn.endpoint_url
            )));
        }
        if conn.initial_reconnect_delay_ms > conn.max_reconnect_delay_ms {
            return Err(SettingsError::InvalidValue(
                "initialReconnectDelayMs exceeds maxReconnectDelayMs".into(),
            ));
        }
        if !(0.0..=0.5).contains(&conn.reconnect_jitter) {
            return Err(SettingsError::InvalidValue(
                "reconnectJitter must be within 0.0..=0.5".into(),
            ));
        }
        if self.commands.max_concurrent_commands == 0 {
            return Err(SettingsError::InvalidValue(
                "maxConcurrentCommands must be at least 1".into(),
            ));
        }
        if self.commands.command_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "commandTimeoutMs must be positive".into(),
            ));
        }
        if self.heartbeat.interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeat intervalMs must be positive".into(),
            ));
        }
        if self.tasks.max_queue_size == 0 {
            return Err(SettingsError::InvalidValue(
                "maxQueueSize must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_validate() {
        AgentSettings::default().validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{"connection":{"endpointUrl":"wss://ctl.example/browser"}}"#;
        let s: AgentSettings = serde_json::from_str(json).unwrap();
        assert_eq!(s.connection.endpoint_url, "wss://ctl.example/browser");
        assert_eq!(s.connection.max_reconnect_attempts, 10);
        assert_eq!(s.commands.command_timeout_ms, 30_000);
        assert_eq!(s.name, "basset-agent");
    }

    #[test]
    fn rejects_http_scheme() {
        let mut s = AgentSettings::default();
        s.connection.endpoint_url = "http://localhost:8765".into();
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn rejects_inverted_delays() {
        let mut s = AgentSettings::default();
        s.connection.initial_reconnect_delay_ms = 60_000;
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut s = AgentSettings::default();
        s.commands.max_concurrent_commands = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_zero_heartbeat() {
        let mut s = AgentSettings::default();
        s.heartbeat.interval_ms = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_excessive_jitter() {
        let mut s = AgentSettings::default();
        s.connection.reconnect_jitter = 0.9;
        assert!(s.validate().is_err());
    }

    #[test]
    fn serializes_camel_case() {
        let v = serde_json::to_value(AgentSettings::default()).unwrap();
        assert!(v["connection"]["endpointUrl"].is_string());
        assert!(v["commands"]["maxConcurrentCommands"].is_number());
        assert!(v["tasks"]["retentionMs"].is_number());
    }
}
