//! Connection lifecycle: the state machine, its reconnect timer, and the
//! heartbeat that runs while the connection is open.

pub mod heartbeat;
pub mod manager;
pub mod reconnect;

pub use heartbeat::HeartbeatTimer;
pub use manager::{CloseAction, CloseOutcome, Connection, ConnectionManager, ConnectionState};
pub use reconnect::ReconnectTimer;
