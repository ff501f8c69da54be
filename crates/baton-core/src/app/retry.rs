//! Retry policy: decides backoff delays between handover attempts.

use std::time::Duration;

/// Exponential backoff policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Retry immediately (tests that only care about attempt counts).
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay before the next attempt, given the number already made (1-indexed).
    ///
    /// delay = base_delay * multiplier^(attempts - 1)
    ///
    /// Example with base_delay=200ms, multiplier=2.0:
    /// - after attempt 1: 200ms
    /// - after attempt 2: 400ms
    /// - after attempt 3: 800ms
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_increases() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
        };

        let d1 = policy.next_delay(1);
        let d2 = policy.next_delay(2);
        let d3 = policy.next_delay(3);

        assert!(d2 > d1);
        assert!(d3 > d2);

        assert_eq!(d1, Duration::from_millis(200));
        assert_eq!(d2, Duration::from_millis(400));
        assert_eq!(d3, Duration::from_millis(800));
    }

    #[test]
    fn zeroth_attempt_uses_base_delay() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
        };
        assert_eq!(policy.next_delay(0), Duration::from_millis(200));
    }

    #[test]
    fn huge_attempt_counts_saturate() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            multiplier: 10.0,
        };
        assert_eq!(policy.next_delay(10_000), Duration::MAX);
        assert_eq!(RetryPolicy::immediate().next_delay(7), Duration::ZERO);
    }
}
