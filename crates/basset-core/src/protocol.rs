//! Wire-format types for the controller channel.
//!
//! All frames are JSON text frames:
//!
//! - inbound command: `{ "command_id", "type", "params" }`
//! - outbound response: `{ "command_id", "success", "result", "error", "timestamp" }`
//! - outbound heartbeat: `{ "type": "heartbeat", "timestamp" }`
//! - outbound announcement on open: `{ "type": "connected", ... }`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::command::CommandKind;
use crate::errors::{EngineError, MISSING_COMMAND_TYPE};

/// Parameters of a command: an opaque JSON object.
pub type Params = Map<String, Value>;

/// A validated inbound command.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    /// Correlation identifier echoed on the Response.
    pub command_id: String,
    /// Requested command type.
    pub kind: CommandKind,
    /// Handler parameters.
    pub params: Params,
}

impl Command {
    /// Build a command directly (used by tests and embedders).
    pub fn new(command_id: impl Into<String>, kind: impl Into<CommandKind>, params: Params) -> Self {
        Self {
            command_id: command_id.into(),
            kind: kind.into(),
            params,
        }
    }

    /// Parse and validate an inbound text frame.
    ///
    /// Validation short-circuits in this order:
    /// 1. the frame must be a JSON object, else `Protocol`
    /// 2. `command_id` must be a non-empty string, else `Protocol`
    /// 3. `type` must be a non-empty string, else `Validation`
    /// 4. `params` must be absent, `null`, or an object, else `Validation`
    ///
    /// Handler resolution happens later, in the router.
    pub fn parse(text: &str) -> Result<Self, EngineError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| EngineError::Protocol(format!("malformed frame: {e}")))?;
        let Value::Object(mut frame) = value else {
            return Err(EngineError::Protocol("frame is not a JSON object".into()));
        };

        let command_id = match frame.remove("command_id") {
            Some(Value::String(id)) if !id.is_empty() => id,
            _ => return Err(EngineError::Protocol("missing command_id".into())),
        };

        let kind = match frame.remove("type") {
            Some(Value::String(t)) if !t.is_empty() => CommandKind::parse(&t),
            _ => return Err(EngineError::validation(command_id, MISSING_COMMAND_TYPE)),
        };

        let params = match frame.remove("params") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(EngineError::validation(
                    command_id,
                    "Invalid params: expected an object",
                ));
            }
        };

        Ok(Self {
            command_id,
            kind,
            params,
        })
    }
}

/// Outbound response envelope.
///
/// `result` and `error` are always present on the wire (as `null` when unset).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Same identifier as the originating command.
    pub command_id: String,
    /// Whether the command succeeded.
    pub success: bool,
    /// Handler result on success.
    pub result: Option<Value>,
    /// Failure text on error.
    pub error: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Response {
    /// Successful response stamped with `timestamp`.
    pub fn success(command_id: impl Into<String>, result: Value, timestamp: i64) -> Self {
        Self {
            command_id: command_id.into(),
            success: true,
            result: Some(result),
            error: None,
            timestamp,
        }
    }

    /// Failure response stamped with `timestamp`.
    pub fn failure(command_id: impl Into<String>, error: impl Into<String>, timestamp: i64) -> Self {
        Self {
            command_id: command_id.into(),
            success: false,
            result: None,
            error: Some(error.into()),
            timestamp,
        }
    }
}

/// Periodic liveness frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Always `"heartbeat"`.
    #[serde(rename = "type")]
    pub frame_type: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Heartbeat {
    /// Heartbeat frame stamped with `timestamp`.
    pub fn new(timestamp: i64) -> Self {
        Self {
            frame_type: "heartbeat".into(),
            timestamp,
        }
    }
}

/// Frame sent once each time the connection reaches OPEN.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announce {
    /// Always `"connected"`.
    #[serde(rename = "type")]
    pub frame_type: String,
    /// Agent name.
    pub agent: String,
    /// Agent version.
    pub version: String,
    /// Registered command types, sorted.
    pub commands: Vec<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Announce {
    /// Build an announcement.
    pub fn new(
        agent: impl Into<String>,
        version: impl Into<String>,
        commands: Vec<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            frame_type: "connected".into(),
            agent: agent.into(),
            version: version.into(),
            commands,
            timestamp,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
