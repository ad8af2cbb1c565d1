//! # basset-core
//!
//! Foundation types shared by every Basset crate.
//!
//! - **Wire protocol**: [`protocol::Command`], [`protocol::Response`],
//!   [`protocol::Heartbeat`] and the connected announcement frame
//! - **Command types**: [`command::CommandKind`], the closed browser command set
//!   plus an extensible `Custom` variant
//! - **Errors**: [`errors::EngineError`] taxonomy and [`errors::HandlerError`]
//!   returned by command handlers
//! - **Backoff**: reconnect delay math in [`backoff`]
//! - **Logging**: `tracing` subscriber bootstrap in [`logging`]

#![deny(unsafe_code)]

pub mod backoff;
pub mod command;
pub mod errors;
pub mod logging;
pub mod protocol;

pub use command::CommandKind;
pub use errors::{EngineError, ErrorKind, HandlerError};
pub use protocol::{Command, Heartbeat, Response};

/// Current wall-clock time as milliseconds since the Unix epoch.
///
/// Every outbound frame is stamped with this value.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
