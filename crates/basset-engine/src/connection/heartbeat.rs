//! Liveness heartbeat while the connection is open.

use std::time::Duration;

use basset_core::{Heartbeat, now_millis};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Shortest cadence the ticker accepts; shorter intervals are raised to it.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

/// Scoped heartbeat ticker.
///
/// Armed on every transition into OPEN and disarmed on every exit from it;
/// the ticker itself is dropped on disarm, so no tick can outlive the open
/// connection that armed it. The first tick fires one full interval after
/// arming.
#[derive(Debug, Default)]
pub struct HeartbeatTimer {
    ticker: Option<Interval>,
    sent: u64,
}

impl HeartbeatTimer {
    /// A disarmed heartbeat.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking every `interval`, or every [`MIN_HEARTBEAT_INTERVAL`]
    /// if `interval` is shorter.
    pub fn arm(&mut self, interval: Duration) {
        let interval = interval.max(MIN_HEARTBEAT_INTERVAL);
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
    }

    /// Stop ticking.
    pub fn disarm(&mut self) {
        self.ticker = None;
    }

    /// Whether the ticker is running.
    pub fn is_armed(&self) -> bool {
        self.ticker.is_some()
    }

    /// Resolve on the next tick. Pending forever while disarmed.
    pub async fn tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                let _ = ticker.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    /// Build the next heartbeat frame and count it as sent.
    pub fn next_frame(&mut self) -> Heartbeat {
        self.sent += 1;
        Heartbeat::new(now_millis())
    }

    /// Heartbeat frames produced so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }
}
