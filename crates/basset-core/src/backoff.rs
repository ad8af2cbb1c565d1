//! Reconnect backoff calculation.
//!
//! Portable, sync-only building blocks for the reconnect scheduler:
//!
//! - [`ReconnectPolicy`]: immutable attempt ceiling and delay bounds
//! - [`ReconnectPolicy::delay`]: `min(initial * 2^attempt, max)`
//! - [`ReconnectPolicy::delay_with_jitter`]: the same value with symmetric
//!   jitter applied, never exceeding the cap
//!
//! Randomness is supplied by the caller so the math stays deterministic.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default maximum reconnect attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// Default initial delay in milliseconds.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
/// Default delay cap in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Reconnect policy: how long to wait and how often to try.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt, in ms.
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay, in ms.
    pub max_delay_ms: u64,
    /// Number of consecutive unsuccessful attempts before giving up.
    pub max_attempts: u32,
    /// Symmetric jitter factor (0.1 means ±10%).
    #[serde(default)]
    pub jitter_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectPolicy {
    /// Un-jittered delay for a zero-based attempt index.
    #[must_use]
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exponential = self
            .initial_delay_ms
            .saturating_mul(1u64 << attempt.min(31));
        exponential.min(self.max_delay_ms)
    }

    /// Un-jittered delay as a [`Duration`].
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.delay_ms(attempt))
    }

    /// Delay with jitter applied.
    ///
    /// `random` must be in `[0.0, 1.0)`. It is mapped to
    /// `[-jitter_factor, +jitter_factor]` and the result is clamped to
    /// `max_delay_ms`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_with_jitter(&self, attempt: u32, random: f64) -> Duration {
        let base = self.delay_ms(attempt);
        if self.jitter_factor <= 0.0 {
            return Duration::from_millis(base);
        }
        let jitter = 1.0 + (random * 2.0 - 1.0) * self.jitter_factor;
        let jittered = ((base as f64) * jitter).round().max(0.0) as u64;
        Duration::from_millis(jittered.min(self.max_delay_ms))
    }

    /// Whether another attempt is allowed after `attempts` have been used.
    #[must_use]
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::default()
    }

    #[test]
    fn defaults() {
        let p = policy();
        assert_eq!(p.initial_delay_ms, 1000);
        assert_eq!(p.max_delay_ms, 30_000);
        assert_eq!(p.max_attempts, 10);
    }

    #[test]
    fn delay_sequence() {
        let p = policy();
        assert_eq!(p.delay_ms(0), 1000);
        assert_eq!(p.delay_ms(1), 2000);
        assert_eq!(p.delay_ms(2), 4000);
        assert_eq!(p.delay_ms(3), 8000);
        assert_eq!(p.delay_ms(4), 16_000);
        assert_eq!(p.delay_ms(5), 30_000);
        assert_eq!(p.delay_ms(10), 30_000);
    }

    #[test]
    fn delay_huge_attempt_does_not_overflow() {
        let p = policy();
        assert_eq!(p.delay_ms(200), 30_000);
        assert_eq!(p.delay(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn jitter_zero_is_exact() {
        let p = policy();
        assert_eq!(p.delay_with_jitter(2, 0.99), Duration::from_millis(4000));
    }

    #[test]
    fn jitter_stays_within_band() {
        let p = ReconnectPolicy {
            jitter_factor: 0.1,
            ..policy()
        };
        let low = p.delay_with_jitter(1, 0.0);
        let high = p.delay_with_jitter(1, 0.999_999);
        assert_eq!(low, Duration::from_millis(1800));
        assert!(high <= Duration::from_millis(2200));
        assert!(high >= Duration::from_millis(2199));
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let p = ReconnectPolicy {
            jitter_factor: 0.1,
            ..policy()
        };
        for random in [0.0, 0.5, 0.75, 0.999] {
            assert!(p.delay_with_jitter(8, random) <= Duration::from_millis(30_000));
        }
    }

    #[test]
    fn allows_counts_attempts() {
        let p = ReconnectPolicy {
            max_attempts: 2,
            ..policy()
        };
        assert!(p.allows(0));
        assert!(p.allows(1));
        assert!(!p.allows(2));
    }

    #[test]
    fn serde_defaults_jitter() {
        let json = r#"{"initialDelayMs":500,"maxDelayMs":5000,"maxAttempts":3}"#;
        let p: ReconnectPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(p.initial_delay_ms, 500);
        assert!(p.jitter_factor.abs() < f64::EPSILON);
    }
}
