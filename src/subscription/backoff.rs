use std::time::Duration;

/// Deterministic exponential backoff for changefeed reconnection.
///
/// Delays follow `base * 2^attempt`, capped at a maximum. Once the attempt
/// budget is spent, `next_delay` returns `None` and the caller must give up
/// with a fatal connectivity error instead of retrying forever.
#[derive(Debug)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            attempt: 0,
        }
    }

    /// Delay before the next reconnect attempt, or `None` when the budget is
    /// exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let exponent = self.attempt.min(31);
        self.attempt += 1;

        let delay = self
            .base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_and_are_capped() {
        let mut policy =
            ReconnectPolicy::new(Duration::from_millis(100), Duration::from_millis(500), 10);

        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(400)));
        // 800ms exceeds the cap.
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn delays_are_monotonically_non_decreasing() {
        let mut policy =
            ReconnectPolicy::new(Duration::from_millis(50), Duration::from_secs(60), 12);
        let mut prev = Duration::ZERO;
        while let Some(delay) = policy.next_delay() {
            assert!(delay >= prev);
            prev = delay;
        }
    }

    #[test]
    fn gives_up_after_exactly_max_attempts() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(10), Duration::from_secs(1), 5);

        for _ in 0..5 {
            assert!(policy.next_delay().is_some());
        }
        assert!(policy.next_delay().is_none());
        assert!(policy.exhausted());
        assert_eq!(policy.attempt_count(), 5);
    }

    #[test]
    fn reset_restores_the_budget_and_base_delay() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(10), Duration::from_secs(1), 3);
        let _ = policy.next_delay();
        let _ = policy.next_delay();

        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn zero_attempts_is_immediately_exhausted() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(10), Duration::from_secs(1), 0);
        assert!(policy.next_delay().is_none());
    }

    #[test]
    fn large_attempt_counts_do_not_overflow() {
        let mut policy = ReconnectPolicy::new(Duration::from_secs(1), Duration::from_secs(64), 40);
        let mut last = Duration::ZERO;
        for _ in 0..40 {
            last = policy.next_delay().unwrap();
        }
        assert_eq!(last, Duration::from_secs(64));
    }
}
