//! Reconnect backoff policy

use std::time::Duration;

/// Exponential backoff with a cap and a bounded number of retries
///
/// The delay before retry `n` (counting from zero) is `min(base * 2^n, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_interval: Duration,
    pub max_interval: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(1_000),
            max_interval: Duration::from_millis(30_000),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given retry
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_interval
            .checked_mul(factor)
            .map_or(self.max_interval, |delay| delay.min(self.max_interval))
    }

    /// Whether another retry is allowed after `attempt` retries
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Every delay the policy will produce, in order
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts).map(|n| self.delay_for(n)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_schedule() {
        let millis: Vec<u128> = ReconnectPolicy::default()
            .schedule()
            .iter()
            .map(Duration::as_millis)
            .collect();
        assert_eq!(
            millis,
            vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 30_000, 30_000, 30_000]
        );
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(64), policy.max_interval);
        assert_eq!(policy.delay_for(u32::MAX), policy.max_interval);
    }

    #[test]
    fn test_allows() {
        let policy = ReconnectPolicy::default();
        assert!(policy.allows(9));
        assert!(!policy.allows(10));
    }

    proptest! {
        #[test]
        fn prop_delay_matches_formula(base in 1u64..5_000, max in 1u64..120_000, attempt in 0u32..40) {
            let policy = ReconnectPolicy {
                base_interval: Duration::from_millis(base),
                max_interval: Duration::from_millis(max),
                max_attempts: 10,
            };
            let expected = (base as u128 * (1u128 << attempt)).min(max as u128);
            prop_assert_eq!(policy.delay_for(attempt).as_millis(), expected);
        }

        #[test]
        fn prop_delay_is_monotonic(attempt in 0u32..60) {
            let policy = ReconnectPolicy::default();
            prop_assert!(policy.delay_for(attempt) <= policy.delay_for(attempt + 1));
            prop_assert!(policy.delay_for(attempt) <= policy.max_interval);
        }
    }
}
