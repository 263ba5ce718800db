//! Capped exponential backoff for reconnection.
//!
//! Delay for attempt `n` (zero-based) is `min(max_delay, base_delay * 2^n)`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default first reconnect delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default reconnect delay ceiling in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default attempt cap. `0` means unlimited.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Reconnection backoff parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffPolicy {
    /// First delay in milliseconds.
    pub base_delay_ms: u64,
    /// Ceiling in milliseconds.
    pub max_delay_ms: u64,
    /// Attempts before giving up; `0` retries forever.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    /// Delay before attempt `attempt` (zero-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(calculate_backoff_delay(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
        ))
    }

    /// Whether `attempts` already-made attempts exhaust the policy.
    #[must_use]
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts != 0 && attempts >= self.max_attempts
    }
}

/// Exponential backoff without jitter, saturating at `max_delay_ms`.
#[must_use]
pub fn calculate_backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    base_delay_ms
        .saturating_mul(1u64 << attempt.min(31))
        .min(max_delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_each_attempt() {
        assert_eq!(calculate_backoff_delay(0, 100, 10_000), 100);
        assert_eq!(calculate_backoff_delay(1, 100, 10_000), 200);
        assert_eq!(calculate_backoff_delay(2, 100, 10_000), 400);
        assert_eq!(calculate_backoff_delay(3, 100, 10_000), 800);
    }

    #[test]
    fn capped_at_max() {
        assert_eq!(calculate_backoff_delay(10, 100, 5_000), 5_000);
        assert_eq!(calculate_backoff_delay(u32::MAX, 100, 5_000), 5_000);
    }

    #[test]
    fn huge_base_saturates() {
        assert_eq!(calculate_backoff_delay(31, u64::MAX / 2, u64::MAX), u64::MAX);
    }

    #[test]
    fn policy_delay_for() {
        let policy = BackoffPolicy {
            base_delay_ms: 10,
            max_delay_ms: 40,
            max_attempts: 0,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for(2), Duration::from_millis(40));
        assert_eq!(policy.delay_for(3), Duration::from_millis(40));
    }

    #[test]
    fn exhausted_respects_cap() {
        let policy = BackoffPolicy {
            max_attempts: 3,
            ..BackoffPolicy::default()
        };
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }

    #[test]
    fn zero_attempt_cap_is_unlimited() {
        let policy = BackoffPolicy {
            max_attempts: 0,
            ..BackoffPolicy::default()
        };
        assert!(!policy.exhausted(u32::MAX));
    }
}
