//! Connection lifecycle state machine.
//!
//! [`ConnectionManager`] is pure bookkeeping: every transition returns a
//! decision ([`CloseAction`], [`CloseOutcome`]) and the event loop performs
//! the I/O. That keeps the state rules testable without sockets or timers.

use std::time::Duration;

use basset_core::backoff::ReconnectPolicy;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::transport::NORMAL_CLOSURE;

/// Lifecycle state of the single controller connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Never connected.
    Disconnected,
    /// A dial is in progress.
    Connecting,
    /// The link is established.
    Open,
    /// The agent initiated a close and is waiting for it to complete.
    Closing,
    /// The link is gone.
    Closed,
}

impl ConnectionState {
    /// Wire-style name, e.g. `"OPEN"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The connection record, mutated only through [`ConnectionManager`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Current state.
    pub state: ConnectionState,
    /// Controller URL.
    pub url: String,
    /// Reconnect attempts since the last successful open.
    pub reconnect_attempt: u32,
    /// Code of the most recent close.
    pub last_close_code: Option<u16>,
    /// Most recent transport error.
    pub last_error: Option<String>,
}

/// What the loop must do after [`ConnectionManager::close`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseAction {
    /// Write a close frame and wait for the link to end.
    SendCloseFrame,
    /// Abort the dial in progress; the close completes immediately.
    AbortDial,
    /// Disarm the pending reconnect timer.
    CancelReconnect,
    /// Nothing to do.
    None,
}

/// What happened after a close was observed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CloseOutcome {
    /// Requested or normal close; no reconnect.
    Clean,
    /// A reconnect was scheduled.
    Reconnect {
        /// Attempt number (1-based) the timer will start.
        attempt: u32,
        /// Delay before dialling.
        delay: Duration,
    },
    /// The controller rejected the agent permanently.
    Rejected {
        /// The permanent close code.
        code: u16,
    },
    /// The reconnect ceiling was reached.
    Exhausted {
        /// Attempts that were made.
        attempts: u32,
    },
}

impl CloseOutcome {
    /// Whether this outcome is terminal (`connection_failed`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::Exhausted { .. })
    }
}

/// Owns the [`Connection`] and the reconnect policy.
pub struct ConnectionManager {
    connection: Connection,
    policy: ReconnectPolicy,
    permanent_close_codes: Vec<u16>,
    reconnect_pending: bool,
    close_requested: bool,
    terminal: bool,
    jitter_source: fn() -> f64,
}

impl ConnectionManager {
    /// Manager for `url` in the `Disconnected` state.
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy, permanent_close_codes: Vec<u16>) -> Self {
        Self {
            connection: Connection {
                state: ConnectionState::Disconnected,
                url: url.into(),
                reconnect_attempt: 0,
                last_close_code: None,
                last_error: None,
            },
            policy,
            permanent_close_codes,
            reconnect_pending: false,
            close_requested: false,
            terminal: false,
            jitter_source: rand::random::<f64>,
        }
    }

    /// Replace the random source used for jitter (tests).
    #[must_use]
    pub fn with_jitter_source(mut self, source: fn() -> f64) -> Self {
        self.jitter_source = source;
        self
    }

    /// The connection record.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state
    }

    /// Whether a reconnect timer should be armed.
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// Whether the manager is in the terminal `connection_failed` state.
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Begin a connection attempt.
    ///
    /// Returns `false` (no-op) while connecting, open, or closing. A pending
    /// reconnect is superseded, and leaving the terminal state resets the
    /// attempt counter.
    pub fn connect(&mut self) -> bool {
        match self.connection.state {
            ConnectionState::Connecting | ConnectionState::Open => {
                debug!(state = %self.connection.state, "connect ignored");
                false
            }
            ConnectionState::Closing => {
                info!("connect ignored while closing");
                false
            }
            ConnectionState::Disconnected | ConnectionState::Closed => {
                if self.terminal {
                    self.terminal = false;
                    self.connection.reconnect_attempt = 0;
                }
                self.reconnect_pending = false;
                self.close_requested = false;
                self.connection.state = ConnectionState::Connecting;
                true
            }
        }
    }

    /// The dial succeeded. Returns `false` if no dial was expected.
    pub fn on_open(&mut self) -> bool {
        if self.connection.state != ConnectionState::Connecting {
            warn!(state = %self.connection.state, "unexpected open");
            return false;
        }
        self.connection.state = ConnectionState::Open;
        self.connection.reconnect_attempt = 0;
        self.connection.last_error = None;
        true
    }

    /// Record a transport error. State changes arrive with the close.
    pub fn on_error(&mut self, error: impl Into<String>) {
        self.connection.last_error = Some(error.into());
    }

    /// Agent-initiated close.
    pub fn close(&mut self) -> CloseAction {
        match self.connection.state {
            ConnectionState::Open => {
                self.connection.state = ConnectionState::Closing;
                self.close_requested = true;
                CloseAction::SendCloseFrame
            }
            ConnectionState::Connecting => {
                self.connection.state = ConnectionState::Closing;
                self.close_requested = true;
                CloseAction::AbortDial
            }
            ConnectionState::Closing => CloseAction::None,
            ConnectionState::Disconnected | ConnectionState::Closed => {
                if self.reconnect_pending {
                    self.reconnect_pending = false;
                    CloseAction::CancelReconnect
                } else {
                    CloseAction::None
                }
            }
        }
    }

    /// The link ended with `code`.
    pub fn on_close(&mut self, code: u16, reason: &str) -> CloseOutcome {
        let previous = self.connection.state;
        self.connection.state = ConnectionState::Closed;
        self.connection.last_close_code = Some(code);
        info!(close_code = code, reason, from = %previous, "connection closed");

        if self.close_requested || code == NORMAL_CLOSURE {
            self.close_requested = false;
            return CloseOutcome::Clean;
        }
        if self.permanent_close_codes.contains(&code) {
            self.terminal = true;
            warn!(close_code = code, "controller rejected agent; not reconnecting");
            return CloseOutcome::Rejected { code };
        }
        self.schedule_reconnect()
    }

    /// Schedule the next reconnect attempt, or enter the terminal state once
    /// the ceiling is reached.
    pub fn schedule_reconnect(&mut self) -> CloseOutcome {
        let attempt = self.connection.reconnect_attempt;
        if !self.policy.allows(attempt) {
            self.terminal = true;
            self.reconnect_pending = false;
            return CloseOutcome::Exhausted { attempts: attempt };
        }
        let delay = self
            .policy
            .delay_with_jitter(attempt, (self.jitter_source)());
        self.connection.reconnect_attempt = attempt + 1;
        self.reconnect_pending = true;
        CloseOutcome::Reconnect {
            attempt: attempt + 1,
            delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts,
            jitter_factor: 0.0,
        }
    }

    fn manager(max_attempts: u32) -> ConnectionManager {
        ConnectionManager::new("ws://localhost:8765/browser", policy(max_attempts), vec![1008])
            .with_jitter_source(|| 0.5)
    }

    fn open(m: &mut ConnectionManager) {
        assert!(m.connect());
        assert!(m.on_open());
    }

    #[test]
    fn starts_disconnected() {
        let m = manager(10);
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert_eq!(m.connection().reconnect_attempt, 0);
        assert!(!m.reconnect_pending());
    }

    #[test]
    fn connect_is_noop_while_connecting_or_open() {
        let mut m = manager(10);
        assert!(m.connect());
        assert!(!m.connect());
        assert!(!m.connect());
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert!(m.on_open());
        assert!(!m.connect());
        assert_eq!(m.state(), ConnectionState::Open);
    }

    #[test]
    fn connect_is_noop_while_closing() {
        let mut m = manager(10);
        open(&mut m);
        assert_eq!(m.close(), CloseAction::SendCloseFrame);
        assert!(!m.connect());
        assert_eq!(m.state(), ConnectionState::Closing);
    }

    #[test]
    fn normal_close_schedules_nothing() {
        let mut m = manager(10);
        open(&mut m);
        assert_eq!(m.on_close(1000, "bye"), CloseOutcome::Clean);
        assert!(!m.reconnect_pending());
        assert_eq!(m.connection().last_close_code, Some(1000));
    }

    #[test]
    fn abnormal_close_schedules_one_reconnect() {
        let mut m = manager(10);
        open(&mut m);
        let outcome = m.on_close(1006, "");
        assert_eq!(
            outcome,
            CloseOutcome::Reconnect {
                attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );
        assert!(m.reconnect_pending());
        assert_eq!(m.connection().reconnect_attempt, 1);
    }

    #[test]
    fn open_resets_attempt_counter() {
        let mut m = manager(10);
        open(&mut m);
        let _ = m.on_close(1006, "");
        assert!(m.connect());
        let _ = m.on_close(1006, "refused");
        assert_eq!(m.connection().reconnect_attempt, 2);
        assert!(m.connect());
        assert!(m.on_open());
        assert_eq!(m.connection().reconnect_attempt, 0);
        assert!(m.connection().last_error.is_none());
    }

    #[test]
    fn backoff_grows_between_failed_attempts() {
        let mut m = manager(10);
        let mut delays = Vec::new();
        for _ in 0..6 {
            assert!(m.connect());
            if let CloseOutcome::Reconnect { delay, .. } = m.on_close(1006, "") {
                delays.push(delay.as_millis());
            }
        }
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16_000, 30_000]);
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let mut m = manager(3);
        for expected in 1..=3 {
            assert!(m.connect());
            assert_matches!(m.on_close(1006, ""), CloseOutcome::Reconnect { attempt, .. } if attempt == expected);
        }
        assert!(m.connect());
        let outcome = m.on_close(1006, "");
        assert_eq!(outcome, CloseOutcome::Exhausted { attempts: 3 });
        assert!(outcome.is_terminal());
        assert!(m.is_terminal());
        assert!(!m.reconnect_pending());
    }

    #[test]
    fn explicit_connect_leaves_terminal_state() {
        let mut m = manager(1);
        assert!(m.connect());
        let _ = m.on_close(1006, "");
        assert!(m.connect());
        let _ = m.on_close(1006, "");
        assert!(m.is_terminal());

        assert!(m.connect());
        assert!(!m.is_terminal());
        assert_eq!(m.connection().reconnect_attempt, 0);
    }

    #[test]
    fn permanent_code_is_terminal() {
        let mut m = manager(10);
        open(&mut m);
        assert_eq!(m.on_close(1008, "policy"), CloseOutcome::Rejected { code: 1008 });
        assert!(m.is_terminal());
        assert!(!m.reconnect_pending());
    }

    #[test]
    fn requested_close_is_clean_regardless_of_code() {
        let mut m = manager(10);
        open(&mut m);
        assert_eq!(m.close(), CloseAction::SendCloseFrame);
        assert_eq!(m.on_close(1006, "no echo"), CloseOutcome::Clean);
    }

    #[test]
    fn close_while_connecting_aborts_dial() {
        let mut m = manager(10);
        assert!(m.connect());
        assert_eq!(m.close(), CloseAction::AbortDial);
        assert_eq!(m.on_close(1000, "closed"), CloseOutcome::Clean);
    }

    #[test]
    fn close_cancels_pending_reconnect() {
        let mut m = manager(10);
        open(&mut m);
        let _ = m.on_close(1011, "server error");
        assert!(m.reconnect_pending());
        assert_eq!(m.close(), CloseAction::CancelReconnect);
        assert!(!m.reconnect_pending());
        assert_eq!(m.close(), CloseAction::None);
    }

    #[test]
    fn explicit_connect_supersedes_pending_reconnect() {
        let mut m = manager(10);
        open(&mut m);
        let _ = m.on_close(1006, "");
        assert!(m.reconnect_pending());
        assert!(m.connect());
        assert!(!m.reconnect_pending());
        assert_eq!(m.state(), ConnectionState::Connecting);
    }

    #[test]
    fn unexpected_open_is_rejected() {
        let mut m = manager(10);
        assert!(!m.on_open());
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn jitter_stays_within_band() {
        let mut m = ConnectionManager::new(
            "ws://x",
            ReconnectPolicy {
                jitter_factor: 0.1,
                ..policy(10)
            },
            vec![],
        )
        .with_jitter_source(|| 1.0);
        assert!(m.connect());
        let CloseOutcome::Reconnect { delay, .. } = m.on_close(1006, "") else {
            panic!("expected reconnect");
        };
        assert!(delay >= Duration::from_millis(900) && delay <= Duration::from_millis(1100));
    }

    #[test]
    fn state_serializes_screaming() {
        let json = serde_json::to_string(&ConnectionState::Open).unwrap();
        assert_eq!(json, r#""OPEN""#);
        assert_eq!(ConnectionState::Closing.to_string(), "CLOSING");
    }
}
