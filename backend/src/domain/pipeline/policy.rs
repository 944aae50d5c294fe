//! Retry budget and exponential backoff shared by receive, persist and delete.

use std::time::Duration;

/// Bounded retry with capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum calls per operation, including the first.
    pub max_attempts: u32,
    /// Delay before the second call.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Effective attempt budget; never below one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Whether another call is allowed after `attempt` calls have failed.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.attempts()
    }

    /// Un-jittered delay to wait after failed call number `attempt`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use login_pipeline::domain::RetryPolicy;
    ///
    /// let policy = RetryPolicy {
    ///     max_attempts: 5,
    ///     initial_backoff: Duration::from_millis(100),
    ///     max_backoff: Duration::from_millis(350),
    /// };
    /// assert_eq!(policy.base_delay(1), Duration::from_millis(100));
    /// assert_eq!(policy.base_delay(2), Duration::from_millis(200));
    /// assert_eq!(policy.base_delay(3), Duration::from_millis(350));
    /// ```
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = 2_u32.saturating_pow(attempt.saturating_sub(1));
        let base_ms = u64::try_from(self.initial_backoff.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_backoff.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(u64::from(exponent)).min(max_ms))
    }
}
