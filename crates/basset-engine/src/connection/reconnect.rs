//! The single reconnect timer.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep};

/// At most one pending reconnect delay.
///
/// Arming replaces any previous deadline; dropping or disarming releases it.
/// [`fired`](Self::fired) stays pending forever while disarmed, so it can
/// sit in a `select!` unconditionally.
#[derive(Debug, Default)]
pub struct ReconnectTimer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ReconnectTimer {
    /// A disarmed timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer to fire after `delay`.
    pub fn arm(&mut self, delay: Duration) {
        self.sleep = Some(Box::pin(tokio::time::sleep(delay)));
    }

    /// Release the pending deadline, if any.
    pub fn disarm(&mut self) {
        self.sleep = None;
    }

    /// Whether a deadline is pending.
    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// When the pending deadline elapses.
    pub fn deadline(&self) -> Option<Instant> {
        self.sleep.as_ref().map(|s| s.deadline())
    }

    /// Resolve when the armed deadline elapses, disarming the timer.
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay_and_disarms() {
        let mut timer = ReconnectTimer::new();
        let start = Instant::now();
        timer.arm(Duration::from_secs(2));
        assert!(timer.is_armed());
        timer.fired().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_timer_never_fires() {
        let mut timer = ReconnectTimer::new();
        timer.arm(Duration::from_millis(10));
        timer.disarm();
        let fired = tokio::time::timeout(Duration::from_secs(60), timer.fired()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_replaces_deadline() {
        let mut timer = ReconnectTimer::new();
        let start = Instant::now();
        timer.arm(Duration::from_secs(30));
        timer.arm(Duration::from_secs(1));
        assert_eq!(timer.deadline(), Some(start + Duration::from_secs(1)));
        timer.fired().await;
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
