//! Command dispatch: handler lookup, admission, task bookkeeping, and
//! response correlation.

pub mod builtin;
pub mod correlator;
pub mod registry;
pub mod router;
pub mod tasks;

pub use builtin::register_builtins;
pub use correlator::{Delivery, ResponseCorrelator};
pub use registry::{CommandHandler, FnHandler, HandlerRegistry, Typed, TypedHandler, handler_fn, typed};
pub use router::{CommandRouter, Completion, HandlerOutcome, Orphans, Routed, RouterLimits, Settlement};
pub use tasks::{DispatchToken, Task, TaskCounts, TaskError, TaskRegistry, TaskStatus};
