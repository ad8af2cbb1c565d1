//! Response envelopes keyed by `command_id`.

use std::sync::atomic::{AtomicU64, Ordering};

use basset_core::{EngineError, Response, now_millis};
use serde_json::Value;
use tracing::{debug, warn};

use crate::connection::ConnectionState;
use crate::transport::OutboundChannel;

/// Whether an emitted Response reached the outbound channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for transmission.
    Sent,
    /// Discarded; the connection was not open or the channel was full.
    Dropped,
}

/// Builds one Response per call and hands it to the socket while OPEN.
///
/// There is no outbound buffer: a Response emitted while the connection is
/// not open is dropped and counted.
#[derive(Debug, Default)]
pub struct ResponseCorrelator {
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl ResponseCorrelator {
    /// A correlator with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a Response envelope stamped with the current time.
    pub fn build(
        command_id: &str,
        success: bool,
        result: Option<Value>,
        error: Option<String>,
    ) -> Response {
        Response {
            command_id: command_id.to_owned(),
            success,
            result: if success { result.or(Some(Value::Null)) } else { None },
            error: if success { None } else { error },
            timestamp: now_millis(),
        }
    }

    /// Emit one Response.
    pub fn emit(
        &self,
        state: ConnectionState,
        outbound: Option<&OutboundChannel>,
        command_id: &str,
        success: bool,
        result: Option<Value>,
        error: Option<String>,
    ) -> Delivery {
        let response = Self::build(command_id, success, result, error);
        let delivery = match outbound {
            Some(channel) if state == ConnectionState::Open => {
                if channel.send_json(&response) {
                    Delivery::Sent
                } else {
                    warn!(command_id, "outbound channel full, response dropped");
                    Delivery::Dropped
                }
            }
            _ => {
                debug!(command_id, %state, "connection not open, response dropped");
                Delivery::Dropped
            }
        };
        let counter = match delivery {
            Delivery::Sent => &self.sent,
            Delivery::Dropped => &self.dropped,
        };
        let _ = counter.fetch_add(1, Ordering::Relaxed);
        delivery
    }

    /// Emit the Response for a settled command.
    pub fn emit_outcome(
        &self,
        state: ConnectionState,
        outbound: Option<&OutboundChannel>,
        command_id: &str,
        outcome: Result<Value, EngineError>,
    ) -> Delivery {
        match outcome {
            Ok(result) => self.emit(state, outbound, command_id, true, Some(result), None),
            Err(err) => self.emit(state, outbound, command_id, false, None, Some(err.to_string())),
        }
    }

    /// Responses queued for transmission.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Responses discarded.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
