use crate::config::types::RetryConfig;
use std::time::Duration;

/// Deterministic exponential backoff, no jitter:
/// `delay(n) = min(base * 2^(n-1), max_delay)` for the n-th retry.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(base: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_delay,
            max_attempts,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.base_delay, config.max_delay, config.max_attempts)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn attempts_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_attempts
    }

    /// Delay to wait after the `retry_count`-th failed attempt.
    pub fn delay(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }

        // Cap the exponent so the shift cannot overflow; anything this large
        // is far beyond max_delay anyway
        let exponent = retry_count.saturating_sub(1).min(31);
        let multiplier = 1u32 << exponent;
        self.base.saturating_mul(multiplier).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_until_cap() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(300), 10);

        let expected_secs = [1, 2, 4, 8, 16, 32, 64, 128, 256, 300];
        for (attempt, &secs) in (1u32..=10).zip(expected_secs.iter()) {
            assert_eq!(
                policy.delay(attempt),
                Duration::from_secs(secs),
                "attempt {}",
                attempt
            );
        }
    }

    #[test]
    fn test_zero_retries_means_no_delay() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(300), 10);
        assert_eq!(policy.delay(0), Duration::ZERO);
    }

    #[test]
    fn test_huge_retry_count_stays_capped() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(300), 10);
        assert_eq!(policy.delay(100), Duration::from_secs(300));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_attempts_exhausted_boundary() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(300), 3);
        assert!(!policy.attempts_exhausted(2));
        assert!(policy.attempts_exhausted(3));
        assert!(policy.attempts_exhausted(4));
    }

    #[test]
    fn test_millisecond_base() {
        let policy = RetryPolicy::new(Duration::from_millis(250), Duration::from_secs(60), 10);
        assert_eq!(policy.delay(1), Duration::from_millis(250));
        assert_eq!(policy.delay(2), Duration::from_millis(500));
        assert_eq!(policy.delay(3), Duration::from_secs(1));
    }
}
