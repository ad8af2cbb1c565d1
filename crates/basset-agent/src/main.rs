//! # basset-agent
//!
//! Agent binary: loads layered settings, starts the command and control
//! engine against the controller, and stops it cleanly on ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use basset_engine::status::JsonFileStatusSink;
use basset_engine::{Engine, EngineConfig, ShutdownCoordinator, StatusBroadcaster, WsConnector};
use basset_settings::AgentSettings;
use clap::Parser;

/// Basset browser agent.
#[derive(Parser, Debug)]
#[command(name = "basset-agent", about = "Basset command and control agent")]
struct Cli {
    /// Controller WebSocket URL (overrides settings).
    #[arg(long)]
    url: Option<String>,

    /// Settings file (defaults to `~/.basset/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level filter, e.g. `info` or `basset_engine=debug`.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    /// Maximum concurrent commands (overrides settings).
    #[arg(long)]
    max_concurrent: Option<usize>,
}

impl Cli {
    /// Apply command-line overrides on top of loaded settings.
    fn apply(&self, settings: &mut AgentSettings) {
        if let Some(ref url) = self.url {
            settings.connection.endpoint_url.clone_from(url);
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
        if let Some(n) = self.max_concurrent {
            settings.commands.max_concurrent_commands = n;
        }
    }
}

fn load(cli: &Cli) -> Result<AgentSettings> {
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(basset_settings::settings_path);
    let mut settings = basset_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;
    basset_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let config = EngineConfig::from(&settings);
    let connector = Arc::new(WsConnector::new(config.connect_timeout));

    let mut broadcaster = StatusBroadcaster::default();
    if let Some(ref path) = settings.status.state_file {
        tracing::info!(path = %path, "recording connection status");
        broadcaster = broadcaster.with_sink(Arc::new(JsonFileStatusSink::new(path)));
    }

    let mut engine = Engine::new(config, connector).with_broadcaster(Arc::new(broadcaster));
    engine.register_builtins();

    let coordinator = ShutdownCoordinator::new();
    let handle = engine.spawn(coordinator.child_token());
    tracing::info!(
        agent = %settings.name,
        url = %settings.connection.endpoint_url,
        "basset agent started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let tasks = handle.take_task().into_iter().collect();
    if !coordinator.graceful_shutdown(tasks, None).await {
        tracing::warn!("engine did not stop in time");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
