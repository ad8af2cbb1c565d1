//! Command validation, admission, and dispatch.
//!
//! The router owns the [`TaskRegistry`], the FIFO of commands waiting for a
//! running slot, and the spawned handler tasks. Handlers run as independent
//! tokio tasks racing the command timeout; each reports back exactly once
//! through the completion channel, and the event loop feeds that report to
//! [`CommandRouter::settle`].

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use basset_core::{Command, CommandKind, EngineError, HandlerError};
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::registry::{CommandHandler, HandlerRegistry};
use super::tasks::{DispatchToken, TaskError, TaskRegistry, TaskStatus};

/// Default per-command deadline.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Admission limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouterLimits {
    /// Per-command deadline.
    pub command_timeout: Duration,
    /// Simultaneously running handlers.
    pub max_concurrent: usize,
    /// Commands waiting for a running slot.
    pub max_pending: usize,
}

impl Default for RouterLimits {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_concurrent: 5,
            max_pending: 1000,
        }
    }
}

/// What [`CommandRouter::handle`] did with a frame.
#[derive(Debug)]
pub enum Routed {
    /// No usable `command_id`; nothing to respond to.
    Dropped(EngineError),
    /// Rejected before dispatch; a failure Response is owed.
    Rejected(EngineError),
    /// A handler was started.
    Started {
        /// Correlation identifier.
        command_id: String,
        /// Command type.
        kind: CommandKind,
    },
    /// Waiting for a running slot.
    Queued {
        /// Correlation identifier.
        command_id: String,
        /// Commands now waiting, this one included.
        depth: usize,
    },
}

/// How a handler task ended.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// The handler settled before the deadline.
    Settled(Result<Value, HandlerError>),
    /// The deadline elapsed first; the handler future was dropped.
    TimedOut,
    /// The handler panicked.
    Panicked,
}

/// Report sent by a handler task when it ends.
#[derive(Debug)]
pub struct Completion {
    /// Correlation identifier.
    pub command_id: String,
    token: DispatchToken,
    /// How the handler ended.
    pub outcome: HandlerOutcome,
}

/// A settled command whose Response is now owed.
#[derive(Debug)]
pub struct Settlement {
    /// Correlation identifier.
    pub command_id: String,
    /// Command type.
    pub kind: CommandKind,
    /// Final task status.
    pub status: TaskStatus,
    /// Result or failure for the Response.
    pub outcome: Result<Value, EngineError>,
}

/// Work abandoned by [`CommandRouter::orphan_all`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Orphans {
    /// Running tasks failed and aborted.
    pub failed: Vec<String>,
    /// Queued commands discarded.
    pub discarded: Vec<String>,
}

struct InFlight {
    token: DispatchToken,
    kind: CommandKind,
    handle: JoinHandle<()>,
}

/// Validates inbound frames and dispatches them to handlers.
pub struct CommandRouter {
    handlers: Arc<HandlerRegistry>,
    tasks: TaskRegistry,
    limits: RouterLimits,
    pending: VecDeque<(Command, Arc<dyn CommandHandler>)>,
    in_flight: HashMap<String, InFlight>,
    completions: mpsc::UnboundedSender<Completion>,
}

impl CommandRouter {
    /// Router over `handlers`. Returns the completion receiver the event
    /// loop must drain into [`settle`](Self::settle).
    pub fn new(
        handlers: Arc<HandlerRegistry>,
        tasks: TaskRegistry,
        limits: RouterLimits,
    ) -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let (completions, rx) = mpsc::unbounded_channel();
        let router = Self {
            handlers,
            tasks,
            limits,
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            completions,
        };
        (router, rx)
    }

    /// Validate one inbound frame and start, queue, or reject it.
    #[instrument(skip_all, fields(bytes = raw.len()))]
    pub fn handle(&mut self, raw: &str) -> Routed {
        let command = match Command::parse(raw) {
            Ok(command) => command,
            Err(err) if err.command_id().is_some() => {
                warn!(command_id = ?err.command_id(), error = %err, "command rejected");
                return Routed::Rejected(err);
            }
            Err(err) => {
                warn!(error = %err, "dropping frame");
                return Routed::Dropped(err);
            }
        };
        let command_id = command.command_id.clone();

        let Some(handler) = self.handlers.get(&command.kind) else {
            warn!(command_id = %command_id, command_type = %command.kind, "unknown command type");
            return Routed::Rejected(EngineError::validation(
                command_id,
                format!("Unknown command type: {}", command.kind),
            ));
        };

        if self.in_flight.contains_key(&command_id)
            || self.pending.iter().any(|(c, _)| c.command_id == command_id)
        {
            warn!(command_id = %command_id, "duplicate in-flight command");
            return Routed::Rejected(EngineError::validation(
                command_id.clone(),
                TaskError::Duplicate(command_id).to_string(),
            ));
        }

        if self.pending.is_empty() && self.in_flight.len() < self.limits.max_concurrent {
            return self.start(command, handler);
        }

        if self.pending.len() >= self.limits.max_pending {
            warn!(command_id = %command_id, pending = self.pending.len(), "command queue full");
            return Routed::Rejected(EngineError::validation(
                command_id,
                format!("Command queue full ({} pending)", self.pending.len()),
            ));
        }

        self.pending.push_back((command, handler));
        let depth = self.pending.len();
        debug!(command_id = %command_id, depth, "command queued");
        Routed::Queued { command_id, depth }
    }

    /// Start queued commands while running slots are free.
    pub fn pump(&mut self) -> Vec<Routed> {
        let mut routed = Vec::new();
        while self.in_flight.len() < self.limits.max_concurrent {
            let Some((command, handler)) = self.pending.pop_front() else {
                break;
            };
            routed.push(self.start(command, handler));
        }
        routed
    }

    fn start(&mut self, command: Command, handler: Arc<dyn CommandHandler>) -> Routed {
        let Command {
            command_id,
            kind,
            params,
        } = command;

        let token = match self.tasks.add(command_id.clone(), kind.clone()) {
            Ok(token) => token,
            Err(err) => {
                return Routed::Rejected(EngineError::validation(command_id, err.to_string()));
            }
        };

        let timeout = self.limits.command_timeout;
        let tx = self.completions.clone();
        let id = command_id.clone();
        let handle = tokio::spawn(async move {
            let work = AssertUnwindSafe(handler.handle(params)).catch_unwind();
            let outcome = match tokio::time::timeout(timeout, work).await {
                Ok(Ok(result)) => HandlerOutcome::Settled(result),
                Ok(Err(_panic)) => HandlerOutcome::Panicked,
                Err(_elapsed) => HandlerOutcome::TimedOut,
            };
            let _ = tx.send(Completion {
                command_id: id,
                token,
                outcome,
            });
        });

        debug!(command_id = %command_id, command_type = %kind, "command dispatched");
        let _ = self.in_flight.insert(
            command_id.clone(),
            InFlight {
                token,
                kind: kind.clone(),
                handle,
            },
        );
        Routed::Started { command_id, kind }
    }

    /// Record a handler report. Returns `None` for reports that no longer
    /// own their task (orphaned or superseded), so at most one Response is
    /// ever produced per dispatch.
    pub fn settle(&mut self, completion: Completion) -> Option<Settlement> {
        let Completion {
            command_id,
            token,
            outcome,
        } = completion;

        if self
            .in_flight
            .get(&command_id)
            .is_none_or(|f| f.token != token)
        {
            debug!(command_id = %command_id, "ignoring late settlement");
            return None;
        }
        let kind = self.in_flight.remove(&command_id)?.kind;

        let (status, outcome, recorded) = match outcome {
            HandlerOutcome::Settled(Ok(value)) => {
                let recorded = self.tasks.complete(&command_id, token).map(|_| ());
                (TaskStatus::Completed, Ok(value), recorded)
            }
            HandlerOutcome::Settled(Err(err)) => {
                let err = EngineError::from_handler(command_id.clone(), err);
                let recorded = self
                    .tasks
                    .fail(&command_id, token, err.to_string())
                    .map(|_| ());
                (TaskStatus::Failed, Err(err), recorded)
            }
            HandlerOutcome::TimedOut => {
                let err = EngineError::timeout(
                    command_id.clone(),
                    kind.as_str(),
                    self.limits.command_timeout,
                );
                warn!(command_id = %command_id, command_type = %kind, "command timed out");
                let recorded = self
                    .tasks
                    .timeout(&command_id, token, err.to_string())
                    .map(|_| ());
                (TaskStatus::TimedOut, Err(err), recorded)
            }
            HandlerOutcome::Panicked => {
                let err = EngineError::Handler {
                    command_id: command_id.clone(),
                    message: format!("Handler for {kind} panicked"),
                };
                warn!(command_id = %command_id, command_type = %kind, "handler panicked");
                let recorded = self
                    .tasks
                    .fail(&command_id, token, err.to_string())
                    .map(|_| ());
                (TaskStatus::Failed, Err(err), recorded)
            }
        };

        if let Err(err) = recorded {
            debug!(command_id = %command_id, error = %err, "settlement no longer owns its task");
            return None;
        }
        Some(Settlement {
            command_id,
            kind,
            status,
            outcome,
        })
    }

    /// Abort every running handler, fail its task with `reason`, and
    /// discard the queue.
    pub fn orphan_all(&mut self, reason: &str) -> Orphans {
        for (_, flight) in self.in_flight.drain() {
            flight.handle.abort();
        }
        let failed = self.tasks.fail_running(reason);
        let discarded: Vec<String> = self
            .pending
            .drain(..)
            .map(|(command, _)| command.command_id)
            .collect();
        if !failed.is_empty() || !discarded.is_empty() {
            warn!(
                failed = failed.len(),
                discarded = discarded.len(),
                reason,
                "abandoning in-flight commands"
            );
        }
        Orphans { failed, discarded }
    }

    /// Run task retention.
    pub fn sweep(&mut self) -> usize {
        self.tasks.sweep()
    }

    /// Running handlers.
    pub fn running(&self) -> usize {
        self.in_flight.len()
    }

    /// Commands waiting for a slot.
    pub fn queued(&self) -> usize {
        self.pending.len()
    }

    /// The task registry.
    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Registered command types.
    pub fn commands(&self) -> Vec<String> {
        self.handlers.kinds()
    }
}

impl Drop for CommandRouter {
    fn drop(&mut self) {
        for flight in self.in_flight.values() {
            flight.handle.abort();
        }
    }
}
