//! # Backoff Policy
//!
//! Deterministic exponential backoff for reconnect attempts:
//! `delay(attempt) = initial_delay * 2^attempt`, no jitter. The policy is a
//! plain value; asking it for a decision performs no I/O and remembers nothing.

use std::time::Duration;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);
/// Default number of retries before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// What the connection manager should do after a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    /// Wait this long, then reconnect.
    Retry(Duration),
    /// The attempt budget is spent.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_attempts,
        }
    }

    /// Decides between another retry and giving up.
    ///
    /// `attempt` counts consecutive failed attempts, starting at 0 for the
    /// first retry after a healthy session.
    pub fn decide(&self, attempt: u32) -> BackoffDecision {
        if attempt >= self.max_attempts {
            return BackoffDecision::Exhausted;
        }
        BackoffDecision::Retry(self.delay(attempt))
    }

    /// Raw delay for `attempt`, saturating at `Duration::MAX`.
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        // A non-zero delay overflows within ~100 doublings.
        let mut delay = self.initial_delay;
        for _ in 0..attempt {
            match delay.checked_mul(2) {
                Some(doubled) => delay = doubled,
                None => return Duration::MAX,
            }
        }
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_from_initial() {
        let policy = BackoffPolicy::new(Duration::from_millis(1000), 5);
        let delays: Vec<u128> = (0..5)
            .map(|attempt| match policy.decide(attempt) {
                BackoffDecision::Retry(d) => d.as_millis(),
                BackoffDecision::Exhausted => panic!("attempt {} should retry", attempt),
            })
            .collect();

        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn test_exhausted_at_max_attempts() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.decide(5), BackoffDecision::Exhausted);
        assert_eq!(policy.decide(6), BackoffDecision::Exhausted);
        assert_eq!(policy.decide(4), BackoffDecision::Retry(Duration::from_millis(16000)));
    }

    #[test]
    fn test_zero_budget_never_retries() {
        let policy = BackoffPolicy::new(Duration::from_millis(250), 0);
        assert_eq!(policy.decide(0), BackoffDecision::Exhausted);
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), u32::MAX);
        assert_eq!(policy.delay(32), Duration::from_secs(1 << 32));
        assert_eq!(policy.delay(40), Duration::from_secs(1 << 40));
        assert_eq!(policy.delay(64), Duration::MAX);
        assert_eq!(policy.delay(u32::MAX), Duration::MAX);
        assert_eq!(BackoffPolicy::new(Duration::ZERO, 3).delay(u32::MAX), Duration::ZERO);
        assert_eq!(
            BackoffPolicy::new(Duration::MAX, u32::MAX).delay(3),
            Duration::MAX
        );
    }

    #[test]
    fn test_decide_is_pure() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.decide(2), policy.decide(2));
    }
}
