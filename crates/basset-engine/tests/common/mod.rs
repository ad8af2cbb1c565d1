//! Shared harness for engine integration tests.

#![allow(dead_code, unreachable_pub)]

use std::sync::Arc;
use std::time::Duration;

use basset_core::backoff::ReconnectPolicy;
use basset_engine::transport::memory::{DialScript, MemoryConnector, MemoryPeer};
use basset_engine::{Engine, EngineConfig, EngineHandle, ConnectionState};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const URL: &str = "ws://controller.test/agent";

/// Short deadlines, no jitter, three reconnect attempts.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.agent_name = "test-agent".into();
    config.endpoint_url = URL.into();
    config.reconnect = ReconnectPolicy {
        initial_delay_ms: 100,
        max_delay_ms: 1_000,
        max_attempts: 3,
        jitter_factor: 0.0,
    };
    config.connect_timeout = Duration::from_secs(1);
    config.close_timeout = Duration::from_secs(2);
    config.heartbeat_interval = Duration::from_secs(1);
    config.limits.command_timeout = Duration::from_millis(500);
    config
}

pub struct Harness {
    pub handle: EngineHandle,
    pub connector: Arc<MemoryConnector>,
    pub peers: mpsc::UnboundedReceiver<MemoryPeer>,
    pub token: CancellationToken,
}

impl Harness {
    /// Engine with built-ins plus whatever `setup` registers.
    pub fn start(config: EngineConfig, fallback: DialScript, setup: impl FnOnce(Engine) -> Engine) -> Self {
        let (connector, peers) = MemoryConnector::with_fallback(fallback);
        let mut engine = Engine::new(config, connector.clone());
        engine.register_builtins();
        let engine = setup(engine);
        let token = CancellationToken::new();
        let handle = engine.spawn(token.clone());
        Self {
            handle,
            connector,
            peers,
            token,
        }
    }

    /// Accepting engine with only the built-ins.
    pub fn accepting(config: EngineConfig) -> Self {
        Self::start(config, DialScript::Accept, |e| e)
    }

    /// Take the next controller-side peer and consume its announcement.
    pub async fn accept(&mut self) -> MemoryPeer {
        let mut peer = self.peers.recv().await.expect("engine dialled");
        let announce = peer.next_json().await.expect("announcement");
        assert_eq!(announce["type"], "connected");
        let _ = self.handle.wait_for_state(ConnectionState::Open).await;
        peer
    }
}

pub fn command(id: &str, kind: &str, params: Value) -> Value {
    json!({ "command_id": id, "type": kind, "params": params })
}

/// Drain queued frames, returning any that carry a `command_id`.
pub fn queued_responses(peer: &mut MemoryPeer) -> Vec<Value> {
    let mut responses = Vec::new();
    while let Some(frame) = peer.try_next_frame() {
        if let basset_engine::transport::OutboundFrame::Text(text) = frame {
            let value: Value = serde_json::from_str(&text).expect("json frame");
            if value.get("command_id").is_some() {
                responses.push(value);
            }
        }
    }
    responses
}
