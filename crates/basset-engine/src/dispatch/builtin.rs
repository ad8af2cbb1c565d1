//! Diagnostic commands answered by the engine itself.

use async_trait::async_trait;
use basset_core::protocol::Params;
use basset_core::{CommandKind, HandlerError, now_millis};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::watch;

use super::registry::{CommandHandler, HandlerRegistry, TypedHandler, typed};
use crate::snapshot::EngineSnapshot;

/// `ping` parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PingParams {
    /// Value echoed back unchanged.
    #[serde(default)]
    pub echo: Option<Value>,
}

/// `ping` result.
#[derive(Debug, Serialize)]
pub struct Pong {
    /// Always `true`.
    pub pong: bool,
    /// Agent clock, ms since the epoch.
    pub timestamp: i64,
    /// The `echo` parameter, if given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo: Option<Value>,
}

/// Liveness probe.
pub struct PingHandler;

#[async_trait]
impl TypedHandler for PingHandler {
    type Params = PingParams;
    type Output = Pong;

    async fn call(&self, params: PingParams) -> Result<Pong, HandlerError> {
        Ok(Pong {
            pong: true,
            timestamp: now_millis(),
            echo: params.echo,
        })
    }
}

/// Returns the latest [`EngineSnapshot`].
pub struct GetStatusHandler {
    snapshots: watch::Receiver<EngineSnapshot>,
}

impl GetStatusHandler {
    /// Handler reading from `snapshots`.
    pub fn new(snapshots: watch::Receiver<EngineSnapshot>) -> Self {
        Self { snapshots }
    }
}

#[async_trait]
impl CommandHandler for GetStatusHandler {
    async fn handle(&self, _params: Params) -> Result<Value, HandlerError> {
        let snapshot = self.snapshots.borrow().clone();
        serde_json::to_value(snapshot)
            .map_err(|e| HandlerError::failed(format!("failed to encode status: {e}")))
    }
}

/// Returns the sorted registered command types.
pub struct ListCommandsHandler {
    snapshots: watch::Receiver<EngineSnapshot>,
}

impl ListCommandsHandler {
    /// Handler reading from `snapshots`.
    pub fn new(snapshots: watch::Receiver<EngineSnapshot>) -> Self {
        Self { snapshots }
    }
}

#[async_trait]
impl CommandHandler for ListCommandsHandler {
    async fn handle(&self, _params: Params) -> Result<Value, HandlerError> {
        let commands = self.snapshots.borrow().commands.clone();
        Ok(json!({ "commands": commands }))
    }
}

/// Register `ping`, `get_status`, and `list_commands`.
pub fn register_builtins(registry: &mut HandlerRegistry, snapshots: &watch::Receiver<EngineSnapshot>) {
    registry.register(CommandKind::Ping, typed(PingHandler));
    registry.register(CommandKind::GetStatus, GetStatusHandler::new(snapshots.clone()));
    registry.register(CommandKind::ListCommands, ListCommandsHandler::new(snapshots.clone()));
}
