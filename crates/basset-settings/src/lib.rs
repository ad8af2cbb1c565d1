//! # basset-settings
//!
//! Layered configuration for the Basset agent.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`AgentSettings::default()`]
//! 2. **Settings file**: `~/.basset/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `BASSET_*` overrides (highest priority)
//!
//! The loaded value is fixed for the lifetime of the process; the engine
//! copies what it needs at construction.
//!
//! # Usage
//!
//! ```no_run
//! use basset_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("controller: {}", settings.connection.endpoint_url);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_file_layer, load_settings,
    load_settings_from_path, settings_path,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = AgentSettings::default();
        let path = settings_path();
        assert!(path.ends_with(".basset/settings.json"));
    }

    #[test]
    fn documented_defaults() {
        let s = AgentSettings::default();
        assert_eq!(s.connection.endpoint_url, "ws://localhost:8765/browser");
        assert_eq!(s.connection.max_reconnect_attempts, 10);
        assert_eq!(s.connection.initial_reconnect_delay_ms, 1000);
        assert_eq!(s.connection.max_reconnect_delay_ms, 30_000);
        assert_eq!(s.commands.command_timeout_ms, 30_000);
        assert_eq!(s.heartbeat.interval_ms, 30_000);
        assert_eq!(s.tasks.max_queue_size, 50);
    }
}
