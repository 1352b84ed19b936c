//! Backoff policy for agent calls.
//!
//! Delay computation is pure so schedules can be checked without sleeping.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(5000),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based). `seed` only matters with jitter.
    pub fn delay_for_retry(&self, retry: u32, seed: u64) -> Duration {
        let delay = backoff_delay(retry, self.base_delay, self.max_delay);
        if self.jitter {
            apply_jitter(delay, seed)
        } else {
            delay
        }
    }
}

/// `base * 2^(retry - 1)`, capped at `max`.
pub fn backoff_delay(retry: u32, base: Duration, max: Duration) -> Duration {
    if retry == 0 {
        return Duration::ZERO;
    }
    let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

/// Spreads `delay` uniformly over [75%, 125%] according to `seed`.
pub fn apply_jitter(delay: Duration, seed: u64) -> Duration {
    let millis = delay.as_millis() as u64;
    let spread = millis / 4;
    if spread == 0 {
        return delay;
    }
    let offset = seed % (spread * 2 + 1);
    Duration::from_millis(millis - spread + offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_schedule_is_capped() {
        let policy = RetryPolicy::default();
        let delays: Vec<u128> = (1..=6)
            .map(|n| policy.delay_for_retry(n, 0).as_millis())
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 5000, 5000]);
    }

    #[test]
    fn test_huge_retry_numbers_do_not_overflow() {
        let delay = backoff_delay(200, Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(delay, Duration::from_secs(30));
        assert_eq!(backoff_delay(0, Duration::from_secs(1), Duration::from_secs(30)), Duration::ZERO);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter: true,
            ..RetryPolicy::default()
        };
        for seed in [0u64, 1, 17, 250, 251, 9_999_999] {
            let ms = policy.delay_for_retry(2, seed).as_millis();
            assert!((750..=1250).contains(&ms), "{} out of range for seed {}", ms, seed);
        }
        assert_eq!(policy.delay_for_retry(2, 7), policy.delay_for_retry(2, 7));
    }

    #[test]
    fn test_attempt_count() {
        assert_eq!(RetryPolicy::default().max_attempts(), 3);
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
    }
}
