//! # Retry Policy
//!
//! Exponential backoff with additive jitter, capped at a maximum delay.

use rand::Rng;
use std::time::Duration;

/// How many times to try and how long to wait between tries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one (always >= 1)
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound (exclusive) of the random jitter added to each delay
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Policy that never waits, for tests and local tooling
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before retry number `retry` (0 = the wait after the first failure):
    /// `base * 2^retry + jitter`, capped at `max_delay`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self
            .base_delay
            .checked_mul(2u32.saturating_pow(retry.min(16)))
            .unwrap_or(self.max_delay);
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            let bound = self.jitter.as_millis().min(u64::MAX as u128) as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..bound.max(1)))
        };
        (exp + jitter).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_without_jitter() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter: Duration::from_millis(500),
        };
        for retry in 0..40 {
            assert!(policy.delay_for(retry) <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_millis(50),
        };
        for _ in 0..100 {
            let d = policy.delay_for(0);
            assert!(d >= Duration::from_millis(100));
            assert!(d < Duration::from_millis(150));
        }
    }

    #[test]
    fn test_attempts_never_zero() {
        assert_eq!(RetryPolicy::immediate(0).attempts(), 1);
    }
}
