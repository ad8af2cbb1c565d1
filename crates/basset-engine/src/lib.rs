//! # basset-engine
//!
//! The command and control engine of a Basset agent.
//!
//! - **Connection**: state machine with exponential reconnect backoff and a
//!   heartbeat that runs only while the socket is open
//! - **Dispatch**: handler registry, bounded concurrency with a FIFO queue,
//!   per-command deadlines, and one Response per `command_id`
//! - **Status**: connection and task events fanned out to local subscribers
//!   and durable sinks
//! - **Transport**: `tokio-tungstenite` in production, in-memory for tests
//!
//! Build an [`Engine`], register handlers, then [`Engine::spawn`] it to get
//! an [`EngineHandle`].

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod engine;
pub mod shutdown;
pub mod snapshot;
pub mod status;
pub mod transport;

pub use config::EngineConfig;
pub use connection::ConnectionState;
pub use dispatch::{CommandHandler, HandlerRegistry, TypedHandler, handler_fn, register_builtins, typed};
pub use engine::{Engine, EngineHandle};
pub use shutdown::ShutdownCoordinator;
pub use snapshot::EngineSnapshot;
pub use status::{AgentEvent, ConnectionStatus, StatusBroadcaster, StatusEvent, TaskEvent};
pub use transport::{Connector, memory::MemoryConnector, ws::WsConnector};
