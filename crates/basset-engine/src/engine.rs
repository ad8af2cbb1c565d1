//! The engine: one event loop driving the connection state machine.
//!
//! Every mutable piece of engine state lives in the event loop and is touched
//! only from its `select!` loop. Transport events, handler completions,
//! timers, and control requests all arrive as futures on that loop, so each
//! transition runs to completion before the next event is observed.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use basset_core::errors::CONNECTION_LOST;
use basset_core::protocol::Announce;
use basset_core::{EngineError, now_millis};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Interval, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::connection::{
    CloseAction, CloseOutcome, ConnectionManager, ConnectionState, HeartbeatTimer, ReconnectTimer,
};
use crate::dispatch::{
    CommandHandler, CommandRouter, Completion, HandlerRegistry, ResponseCorrelator, Routed,
    Settlement, TaskRegistry,
};
use crate::shutdown::DEFAULT_SHUTDOWN_TIMEOUT;
use crate::snapshot::EngineSnapshot;
use crate::status::{AgentEvent, ConnectionStatus, StatusBroadcaster, TaskEvent, TaskEventKind};
use crate::transport::{
    ABNORMAL_CLOSURE, Connector, NORMAL_CLOSURE, OutboundChannel, OutboundFrame, TransportError,
    TransportEvent, TransportLink,
};

/// Floor for the task sweep cadence.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

const CONTROL_CAPACITY: usize = 32;

/// Close reason sent when the engine stops.
pub const SHUTDOWN_REASON: &str = "agent shutdown";

/// Requests from [`EngineHandle`] to the loop.
#[derive(Debug)]
enum Control {
    Connect,
    Close { code: u16, reason: String },
}

/// An engine that has not started yet.
///
/// Register handlers, then [`spawn`](Self::spawn) it.
pub struct Engine {
    config: EngineConfig,
    connector: Arc<dyn Connector>,
    registry: HandlerRegistry,
    broadcaster: Arc<StatusBroadcaster>,
    snapshot_tx: watch::Sender<EngineSnapshot>,
}

impl Engine {
    /// Engine dialling through `connector`.
    pub fn new(config: EngineConfig, connector: Arc<dyn Connector>) -> Self {
        let (snapshot_tx, _) =
            watch::channel(EngineSnapshot::initial(config.endpoint_url.clone(), Vec::new()));
        Self {
            config,
            connector,
            registry: HandlerRegistry::new(),
            broadcaster: Arc::new(StatusBroadcaster::default()),
            snapshot_tx,
        }
    }

    /// Use `broadcaster` (with its sinks) for status events.
    #[must_use]
    pub fn with_broadcaster(mut self, broadcaster: Arc<StatusBroadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    /// The handler registry, writable until the engine is spawned.
    pub fn registry_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.registry
    }

    /// Register a handler.
    pub fn register(
        &mut self,
        kind: impl Into<basset_core::CommandKind>,
        handler: impl CommandHandler + 'static,
    ) {
        self.registry.register(kind, handler);
    }

    /// Register `ping`, `get_status`, and `list_commands`.
    pub fn register_builtins(&mut self) {
        let snapshots = self.snapshot_tx.subscribe();
        crate::dispatch::register_builtins(&mut self.registry, &snapshots);
    }

    /// Receiver of engine snapshots. Valid before and after spawning.
    pub fn snapshots(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// The status broadcaster.
    pub fn broadcaster(&self) -> Arc<StatusBroadcaster> {
        Arc::clone(&self.broadcaster)
    }

    /// Start the event loop. Cancelling `shutdown` stops it.
    pub fn spawn(self, shutdown: CancellationToken) -> EngineHandle {
        let Self {
            config,
            connector,
            registry,
            broadcaster,
            snapshot_tx,
        } = self;

        let registry = Arc::new(registry);
        let commands = registry.kinds();
        snapshot_tx.send_modify(|s| s.commands.clone_from(&commands));

        let tasks = TaskRegistry::new(config.max_retained_tasks, config.task_retention);
        let (router, completions) = CommandRouter::new(registry, tasks, config.limits);
        let manager = ConnectionManager::new(
            config.endpoint_url.clone(),
            config.reconnect,
            config.permanent_close_codes.clone(),
        );
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let snapshots = snapshot_tx.subscribe();
        let mut sweep = tokio::time::interval(config.sweep_interval.max(MIN_SWEEP_INTERVAL));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let event_loop = EventLoop {
            config,
            connector,
            manager,
            heartbeat: HeartbeatTimer::new(),
            reconnect: ReconnectTimer::new(),
            router,
            completions,
            correlator: ResponseCorrelator::new(),
            broadcaster: Arc::clone(&broadcaster),
            snapshots: snapshot_tx,
            control: control_rx,
            token: shutdown.clone(),
            dial: None,
            outbound: None,
            frames_dropped: 0,
            inbound: None,
            closing: None,
            sweep,
            commands,
        };
        let task = tokio::spawn(event_loop.run());

        EngineHandle {
            control: control_tx,
            snapshots,
            broadcaster,
            token: shutdown,
            task: Mutex::new(Some(task)),
        }
    }
}

/// Handle to a running engine.
pub struct EngineHandle {
    control: mpsc::Sender<Control>,
    snapshots: watch::Receiver<EngineSnapshot>,
    broadcaster: Arc<StatusBroadcaster>,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EngineHandle {
    /// Ask the engine to connect. A no-op while connecting, open, or
    /// closing. Returns `false` if the engine has stopped.
    pub async fn connect(&self) -> bool {
        self.control.send(Control::Connect).await.is_ok()
    }

    /// Ask the engine to close the connection with `code`. No reconnect
    /// follows. Returns `false` if the engine has stopped.
    pub async fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.control
            .send(Control::Close {
                code,
                reason: reason.into(),
            })
            .await
            .is_ok()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.snapshots.borrow().state()
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshots.borrow().clone()
    }

    /// A fresh snapshot receiver.
    pub fn snapshots(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshots.clone()
    }

    /// Subscribe to status and task events.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.broadcaster.subscribe()
    }

    /// Wait until a snapshot satisfies `predicate`. `None` once the engine
    /// has stopped without satisfying it.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&EngineSnapshot) -> bool,
    ) -> Option<EngineSnapshot> {
        let mut rx = self.snapshots.clone();
        rx.wait_for(predicate).await.ok().map(|s| (*s).clone())
    }

    /// Wait until the connection reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) -> Option<EngineSnapshot> {
        self.wait_for(|s| s.state() == state).await
    }

    /// Whether the event loop is still running.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Take the loop's join handle, e.g. to hand it to a
    /// [`ShutdownCoordinator`](crate::shutdown::ShutdownCoordinator).
    pub fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task.lock().take()
    }

    /// Stop the engine: close the socket with 1000, abort in-flight
    /// handlers, and wait for the loop to exit. Returns `false` if the loop
    /// had to be aborted.
    pub async fn shutdown(&self) -> bool {
        self.token.cancel();
        let Some(mut task) = self.take_task() else {
            return true;
        };
        if tokio::time::timeout(DEFAULT_SHUTDOWN_TIMEOUT, &mut task)
            .await
            .is_ok()
        {
            true
        } else {
            warn!("engine loop did not stop in time, aborting");
            task.abort();
            false
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event loop
// ─────────────────────────────────────────────────────────────────────────────

struct PendingClose {
    code: u16,
    reason: String,
    deadline: Pin<Box<Sleep>>,
}

type DialTask = JoinHandle<Result<TransportLink, TransportError>>;

struct EventLoop {
    config: EngineConfig,
    connector: Arc<dyn Connector>,
    manager: ConnectionManager,
    heartbeat: HeartbeatTimer,
    reconnect: ReconnectTimer,
    router: CommandRouter,
    completions: mpsc::UnboundedReceiver<Completion>,
    correlator: ResponseCorrelator,
    broadcaster: Arc<StatusBroadcaster>,
    snapshots: watch::Sender<EngineSnapshot>,
    control: mpsc::Receiver<Control>,
    token: CancellationToken,
    dial: Option<DialTask>,
    outbound: Option<OutboundChannel>,
    /// Frames dropped on links that are gone.
    frames_dropped: u64,
    inbound: Option<mpsc::Receiver<TransportEvent>>,
    closing: Option<PendingClose>,
    sweep: Interval,
    commands: Vec<String>,
}

impl EventLoop {
    async fn run(mut self) {
        info!(url = %self.config.endpoint_url, commands = self.commands.len(), "engine started");
        if self.config.auto_connect {
            self.begin_connect();
        }
        self.publish_snapshot();

        loop {
            tokio::select! {
                biased;

                () = self.token.cancelled() => break,
                Some(control) = self.control.recv() => self.on_control(control),
                joined = join_dial(&mut self.dial) => self.on_dial(joined),
                event = recv_event(&mut self.inbound) => self.on_transport(event),
                Some(completion) = self.completions.recv() => self.on_completion(completion),
                (code, reason) = close_deadline(&mut self.closing) => {
                    debug!(close_code = code, "close handshake not acknowledged");
                    self.closing = None;
                    self.on_link_closed(code, &reason);
                }
                () = self.reconnect.fired() => {
                    debug!("reconnect timer fired");
                    self.begin_connect();
                }
                () = self.heartbeat.tick() => self.send_heartbeat(),
                _ = self.sweep.tick() => {
                    let purged = self.router.sweep();
                    if purged > 0 {
                        debug!(purged, "swept finished tasks");
                    }
                }
            }
            self.publish_snapshot();
        }

        self.teardown();
        self.publish_snapshot();
        info!("engine stopped");
    }

    // ── Connection lifecycle ────────────────────────────────────────

    fn begin_connect(&mut self) {
        if !self.manager.connect() {
            return;
        }
        self.reconnect.disarm();

        let url = self.manager.connection().url.clone();
        let attempt = self.manager.connection().reconnect_attempt;
        info!(url = %url, attempt, "connecting");
        self.publish_status(
            ConnectionStatus::Connecting,
            json!({ "url": url, "attempt": attempt }),
        );

        let connector = Arc::clone(&self.connector);
        let timeout = self.config.connect_timeout;
        self.dial = Some(tokio::spawn(async move {
            tokio::time::timeout(timeout, connector.connect(&url))
                .await
                .unwrap_or(Err(TransportError::Timeout(timeout)))
        }));
    }

    fn on_dial(&mut self, joined: Result<Result<TransportLink, TransportError>, JoinError>) {
        let result = joined.unwrap_or_else(|e| Err(TransportError::Connect(e.to_string())));
        match result {
            Ok(link) => {
                if !self.manager.on_open() {
                    return;
                }
                let TransportLink { outbound, inbound } = link;
                self.outbound = Some(OutboundChannel::new(outbound));
                self.inbound = Some(inbound);
                self.heartbeat.arm(self.config.heartbeat_interval);

                let url = self.manager.connection().url.clone();
                info!(url = %url, "connected");
                self.publish_status(ConnectionStatus::Connected, json!({ "url": url }));
                self.announce();
            }
            Err(err) => {
                warn!(
                    error = %err,
                    attempt = self.manager.connection().reconnect_attempt,
                    "connection attempt failed"
                );
                let reason = err.to_string();
                self.manager.on_error(reason.clone());
                self.on_link_closed(ABNORMAL_CLOSURE, &reason);
            }
        }
    }

    fn announce(&self) {
        let frame = Announce::new(
            self.config.agent_name.clone(),
            self.config.agent_version.clone(),
            self.commands.clone(),
            now_millis(),
        );
        let sent = self.outbound.as_ref().is_some_and(|out| out.send_json(&frame));
        if !sent {
            warn!("connected announcement dropped");
        }
    }

    fn on_transport(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Message(text)) => self.on_message(&text),
            Some(TransportEvent::Error(message)) => {
                warn!(error = %message, "transport error");
                self.manager.on_error(message);
            }
            Some(TransportEvent::Close { code, reason }) => self.on_link_closed(code, &reason),
            None => self.on_link_closed(ABNORMAL_CLOSURE, "transport closed"),
        }
    }

    fn on_control(&mut self, control: Control) {
        match control {
            Control::Connect => self.begin_connect(),
            Control::Close { code, reason } => self.begin_close(code, reason),
        }
    }

    fn begin_close(&mut self, code: u16, reason: String) {
        match self.manager.close() {
            CloseAction::SendCloseFrame => {
                info!(close_code = code, reason = %reason, "closing connection");
                self.heartbeat.disarm();
                self.abandon_tasks();
                if let Some(out) = &self.outbound {
                    let _ = out.send(OutboundFrame::Close {
                        code,
                        reason: reason.clone(),
                    });
                }
                self.closing = Some(PendingClose {
                    code,
                    reason,
                    deadline: Box::pin(tokio::time::sleep(self.config.close_timeout)),
                });
            }
            CloseAction::AbortDial => {
                info!(close_code = code, "aborting connection attempt");
                self.on_link_closed(code, &reason);
            }
            CloseAction::CancelReconnect => {
                info!("pending reconnect cancelled");
                self.reconnect.disarm();
            }
            CloseAction::None => debug!(state = %self.manager.state(), "close ignored"),
        }
    }

    /// Every path out of CONNECTING, OPEN, or CLOSING ends here.
    fn on_link_closed(&mut self, code: u16, reason: &str) {
        if matches!(
            self.manager.state(),
            ConnectionState::Closed | ConnectionState::Disconnected
        ) {
            debug!(close_code = code, "close already handled");
            return;
        }

        self.heartbeat.disarm();
        self.closing = None;
        if let Some(out) = self.outbound.take() {
            self.frames_dropped += out.drop_count();
        }
        self.inbound = None;
        if let Some(dial) = self.dial.take() {
            dial.abort();
        }
        self.abandon_tasks();

        match self.manager.on_close(code, reason) {
            CloseOutcome::Clean => {
                self.publish_status(
                    ConnectionStatus::Disconnected,
                    json!({ "code": code, "reason": reason }),
                );
            }
            CloseOutcome::Reconnect { attempt, delay } => {
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                info!(attempt, delay_ms, "reconnect scheduled");
                self.reconnect.arm(delay);
                self.publish_status(
                    ConnectionStatus::Disconnected,
                    json!({
                        "code": code,
                        "reason": reason,
                        "reconnectAttempt": attempt,
                        "reconnectInMs": delay_ms,
                    }),
                );
            }
            CloseOutcome::Rejected { code } => {
                self.publish_status(
                    ConnectionStatus::Disconnected,
                    json!({ "code": code, "reason": reason }),
                );
                self.publish_status(
                    ConnectionStatus::ConnectionFailed,
                    json!({ "code": code, "reason": reason, "rejected": true }),
                );
            }
            CloseOutcome::Exhausted { attempts } => {
                let fatal = EngineError::Fatal { attempts };
                error!(attempts, "{fatal}");
                self.publish_status(
                    ConnectionStatus::Disconnected,
                    json!({ "code": code, "reason": reason }),
                );
                self.publish_status(
                    ConnectionStatus::ConnectionFailed,
                    json!({ "attempts": attempts, "error": fatal.to_string() }),
                );
            }
        }
    }

    fn send_heartbeat(&mut self) {
        let Some(out) = self
            .outbound
            .as_ref()
            .filter(|_| self.manager.state() == ConnectionState::Open)
        else {
            self.heartbeat.disarm();
            return;
        };
        let frame = self.heartbeat.next_frame();
        if !out.send_json(&frame) {
            warn!("heartbeat dropped");
        }
    }

    // ── Commands ────────────────────────────────────────────────────

    fn on_message(&mut self, text: &str) {
        let state = self.manager.state();
        if state != ConnectionState::Open {
            debug!(%state, "ignoring inbound frame");
            return;
        }
        let routed = self.router.handle(text);
        self.apply_routed(routed);
    }

    fn apply_routed(&self, routed: Routed) {
        match routed {
            Routed::Dropped(_) | Routed::Queued { .. } => {}
            Routed::Rejected(err) => {
                let Some(command_id) = err.command_id().map(str::to_owned) else {
                    return;
                };
                let _ = self.correlator.emit_outcome(
                    self.manager.state(),
                    self.outbound.as_ref(),
                    &command_id,
                    Err(err),
                );
            }
            Routed::Started { command_id, kind } => {
                self.broadcaster.publish_task(TaskEvent::new(
                    command_id,
                    kind.as_str(),
                    TaskEventKind::Started,
                    None,
                ));
            }
        }
    }

    fn on_completion(&mut self, completion: Completion) {
        if let Some(settlement) = self.router.settle(completion) {
            let Settlement {
                command_id,
                kind,
                status,
                outcome,
            } = settlement;
            let error = outcome.as_ref().err().map(ToString::to_string);
            let delivery = self.correlator.emit_outcome(
                self.manager.state(),
                self.outbound.as_ref(),
                &command_id,
                outcome,
            );
            debug!(command_id = %command_id, command_type = %kind, ?status, ?delivery, "command settled");
            self.broadcaster.publish_task(TaskEvent::new(
                command_id,
                kind.as_str(),
                status.into(),
                error,
            ));
        }
        for routed in self.router.pump() {
            self.apply_routed(routed);
        }
    }

    /// Fail running tasks and discard the queue; no Response is sent.
    fn abandon_tasks(&mut self) {
        let orphans = self.router.orphan_all(CONNECTION_LOST);
        for command_id in orphans.failed {
            let command_type = self
                .router
                .tasks()
                .get(&command_id)
                .map(|t| t.kind.as_str().to_owned())
                .unwrap_or_default();
            self.broadcaster.publish_task(TaskEvent::new(
                command_id,
                command_type,
                TaskEventKind::Failed,
                Some(CONNECTION_LOST.to_owned()),
            ));
        }
        for command_id in orphans.discarded {
            debug!(command_id = %command_id, "queued command discarded");
        }
    }

    // ── Publishing ──────────────────────────────────────────────────

    fn publish_status(&self, status: ConnectionStatus, data: Value) {
        self.publish_snapshot();
        let _ = self.broadcaster.publish(status, data);
    }

    fn publish_snapshot(&self) {
        let tasks = self.router.tasks();
        let snapshot = EngineSnapshot {
            connection: self.manager.connection().clone(),
            reconnect_pending: self.reconnect.is_armed(),
            terminal: self.manager.is_terminal(),
            running: self.router.running(),
            queued: self.router.queued(),
            task_counts: tasks.counts(),
            tasks: tasks.tasks().into_iter().cloned().collect(),
            heartbeats_sent: self.heartbeat.sent(),
            responses_sent: self.correlator.sent(),
            responses_dropped: self.correlator.dropped(),
            frames_dropped: self.frames_dropped
                + self.outbound.as_ref().map_or(0, OutboundChannel::drop_count),
            commands: self.commands.clone(),
        };
        let _ = self.snapshots.send_replace(snapshot);
    }

    fn teardown(&mut self) {
        info!("engine shutting down");
        self.reconnect.disarm();
        let action = self.manager.close();
        if action == CloseAction::SendCloseFrame {
            if let Some(out) = &self.outbound {
                let _ = out.send(OutboundFrame::Close {
                    code: NORMAL_CLOSURE,
                    reason: SHUTDOWN_REASON.to_owned(),
                });
            }
        }
        if self.manager.state() == ConnectionState::Closing {
            self.on_link_closed(NORMAL_CLOSURE, SHUTDOWN_REASON);
        } else {
            self.abandon_tasks();
        }
    }
}

async fn join_dial(
    dial: &mut Option<DialTask>,
) -> Result<Result<TransportLink, TransportError>, JoinError> {
    match dial.as_mut() {
        Some(task) => {
            let joined = task.await;
            *dial = None;
            joined
        }
        None => std::future::pending().await,
    }
}

async fn recv_event(inbound: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match inbound.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn close_deadline(closing: &mut Option<PendingClose>) -> (u16, String) {
    match closing.as_mut() {
        Some(pending) => {
            pending.deadline.as_mut().await;
            (pending.code, pending.reason.clone())
        }
        None => std::future::pending().await,
    }
}
