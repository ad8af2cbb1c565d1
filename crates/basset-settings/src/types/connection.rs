//! Controller connection settings.

use basset_core::backoff::{
    DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS, ReconnectPolicy,
};
use serde::{Deserialize, Serialize};

/// Default controller endpoint.
pub const DEFAULT_ENDPOINT_URL: &str = "ws://localhost:8765/browser";

/// Connection target and reconnect policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Controller WebSocket URL.
    pub endpoint_url: String,
    /// Reconnect ceiling.
    pub max_reconnect_attempts: u32,
    /// Backoff base in milliseconds.
    pub initial_reconnect_delay_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_reconnect_delay_ms: u64,
    /// Symmetric jitter factor applied to each reconnect delay.
    pub reconnect_jitter: f64,
    /// Deadline for a single connection attempt in milliseconds.
    pub connect_timeout_ms: u64,
    /// Close codes that mean the controller rejected us for good.
    pub permanent_close_codes: Vec<u16>,
    /// Connect as soon as the engine starts.
    pub auto_connect: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            max_reconnect_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_reconnect_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_reconnect_delay_ms: DEFAULT_MAX_DELAY_MS,
            reconnect_jitter: 0.1,
            connect_timeout_ms: 10_000,
            permanent_close_codes: vec![1008],
            auto_connect: true,
        }
    }
}

impl ConnectionSettings {
    /// The reconnect policy these settings describe.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay_ms: self.initial_reconnect_delay_ms,
            max_delay_ms: self.max_reconnect_delay_ms,
            max_attempts: self.max_reconnect_attempts,
            jitter_factor: self.reconnect_jitter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ConnectionSettings::default();
        assert_eq!(c.endpoint_url, "ws://localhost:8765/browser");
        assert_eq!(c.max_reconnect_attempts, 10);
        assert_eq!(c.initial_reconnect_delay_ms, 1000);
        assert_eq!(c.max_reconnect_delay_ms, 30_000);
        assert_eq!(c.permanent_close_codes, vec![1008]);
        assert!(c.auto_connect);
    }

    #[test]
    fn policy_mirrors_settings() {
        let c = ConnectionSettings {
            max_reconnect_attempts: 3,
            initial_reconnect_delay_ms: 250,
            ..ConnectionSettings::default()
        };
        let p = c.reconnect_policy();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.delay_ms(0), 250);
        assert_eq!(p.delay_ms(2), 1000);
    }
}
