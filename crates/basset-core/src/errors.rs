//! Error taxonomy for the command and control engine.
//!
//! - [`EngineError`]: every failure the engine can observe, classified by
//!   [`ErrorKind`]. Command-level kinds carry the `command_id` they resolve
//!   into a failure Response for; connection-level kinds drive the state
//!   machine instead.
//! - [`HandlerError`]: what a command handler returns when it fails.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure text for a command frame without a `type`.
pub const MISSING_COMMAND_TYPE: &str = "Missing command type";
/// Failure text for a command whose task was orphaned by a disconnect.
pub const CONNECTION_LOST: &str = "Connection lost";

/// Classification of an [`EngineError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed frame or missing `command_id`; no Response possible.
    Protocol,
    /// Rejected before or by the handler because the request is invalid.
    Validation,
    /// The handler failed while executing.
    Handler,
    /// The handler did not settle before the command deadline.
    Timeout,
    /// Transport-level failure; drives reconnection.
    Connection,
    /// Reconnect attempts exhausted; requires manual intervention.
    Fatal,
}

impl ErrorKind {
    /// Whether this kind resolves into a failure Response.
    pub fn produces_response(self) -> bool {
        matches!(self, Self::Validation | Self::Handler | Self::Timeout)
    }
}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Frame could not be parsed or carries no usable `command_id`.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Command rejected as invalid.
    #[error("{message}")]
    Validation {
        /// Command the failure correlates to.
        command_id: String,
        /// Text placed in the Response.
        message: String,
    },

    /// Handler raised an error.
    #[error("{message}")]
    Handler {
        /// Command the failure correlates to.
        command_id: String,
        /// Text placed in the Response.
        message: String,
    },

    /// Handler exceeded the command timeout.
    #[error("Command {command_type} timed out after {timeout_ms}ms")]
    Timeout {
        /// Command the failure correlates to.
        command_id: String,
        /// Wire name of the command type.
        command_type: String,
        /// Deadline that was exceeded.
        timeout_ms: u64,
    },

    /// Connection refused, dropped, or errored.
    #[error("connection error: {0}")]
    Connection(String),

    /// Reconnect ceiling reached.
    #[error("connection failed after {attempts} reconnect attempts")]
    Fatal {
        /// Attempts that were made.
        attempts: u32,
    },
}

impl EngineError {
    /// Validation failure for a known command.
    pub fn validation(command_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            command_id: command_id.into(),
            message: message.into(),
        }
    }

    /// Timeout failure for a known command.
    #[allow(clippy::cast_possible_truncation)]
    pub fn timeout(
        command_id: impl Into<String>,
        command_type: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self::Timeout {
            command_id: command_id.into(),
            command_type: command_type.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Convert a handler failure into an engine error for `command_id`.
    ///
    /// `InvalidParams` stays in the validation class.
    pub fn from_handler(command_id: impl Into<String>, err: HandlerError) -> Self {
        let command_id = command_id.into();
        match err {
            HandlerError::InvalidParams { message } => Self::Validation {
                command_id,
                message,
            },
            HandlerError::Failed { message } => Self::Handler {
                command_id,
                message,
            },
        }
    }

    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Handler { .. } => ErrorKind::Handler,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Connection(_) => ErrorKind::Connection,
            Self::Fatal { .. } => ErrorKind::Fatal,
        }
    }

    /// The `command_id` a failure Response must carry, if any.
    pub fn command_id(&self) -> Option<&str> {
        match self {
            Self::Validation { command_id, .. }
            | Self::Handler { command_id, .. }
            | Self::Timeout { command_id, .. } => Some(command_id),
            Self::Protocol(_) | Self::Connection(_) | Self::Fatal { .. } => None,
        }
    }

    /// Text placed in the failure Response, for command-level kinds.
    pub fn response_message(&self) -> Option<String> {
        self.kind()
            .produces_response()
            .then(|| self.to_string())
    }
}

/// Error returned by a command handler.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// The handler rejected its parameters.
    #[error("{message}")]
    InvalidParams {
        /// What is wrong with the parameters.
        message: String,
    },

    /// The handler failed while performing its work.
    #[error("{message}")]
    Failed {
        /// Failure description.
        message: String,
    },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::InvalidParams`].
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Shorthand for [`HandlerError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// The message text, exactly as it will appear in the Response.
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidParams { message } | Self::Failed { message } => message,
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_params(format!("Invalid params: {err}"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
