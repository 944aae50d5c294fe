//! Port and runtime dependency bundles for the login pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::domain::ports::{LoginEventQueue, LoginRecordSink};

/// Async sleeping abstraction for retry backoff.
#[async_trait]
pub trait RetrySleeper: Send + Sync {
    /// Suspend execution for `duration`.
    ///
    /// ```rust,no_run
    /// use async_trait::async_trait;
    /// use login_pipeline::domain::RetrySleeper;
    /// use std::sync::{Arc, Mutex};
    /// use std::time::Duration;
    /// #[derive(Default)]
    /// struct CountingSleeper {
    ///     calls: Arc<Mutex<u32>>,
    /// }
    /// #[async_trait]
    /// impl RetrySleeper for CountingSleeper {
    ///     async fn sleep(&self, _duration: Duration) {
    ///         *self.calls.lock().expect("calls mutex") += 1;
    ///     }
    /// }
    /// # async fn demo() {
    /// let sleeper = CountingSleeper::default();
    /// sleeper.sleep(Duration::from_millis(25)).await;
    /// assert_eq!(*sleeper.calls.lock().expect("calls mutex"), 1);
    /// # }
    /// ```
    async fn sleep(&self, duration: Duration);
}

/// Retry backoff jitter abstraction.
pub trait BackoffJitter: Send + Sync {
    /// Return a jittered delay from the exponential base delay.
    ///
    /// ```rust
    /// use login_pipeline::domain::BackoffJitter;
    /// use std::time::Duration;
    /// struct DeterministicJitter;
    /// impl BackoffJitter for DeterministicJitter {
    ///     fn jittered_delay(&self, base: Duration, attempt: u32) -> Duration {
    ///         base + Duration::from_millis(u64::from(attempt) * 5)
    ///     }
    /// }
    /// let delay = DeterministicJitter.jittered_delay(Duration::from_millis(100), 2);
    /// assert_eq!(delay, Duration::from_millis(110));
    /// ```
    fn jittered_delay(&self, base: Duration, attempt: u32) -> Duration;
}

/// Ports the pipeline drives.
pub struct LoginPipelinePorts {
    /// Queue delivering raw login events.
    pub queue: Arc<dyn LoginEventQueue>,
    /// Store receiving transformed rows.
    pub sink: Arc<dyn LoginRecordSink>,
}

impl LoginPipelinePorts {
    /// Bundle the queue and sink adapters.
    pub fn new(queue: Arc<dyn LoginEventQueue>, sink: Arc<dyn LoginRecordSink>) -> Self {
        Self { queue, sink }
    }
}

/// Runtime helpers used by retry policy.
pub struct LoginPipelineRuntime {
    /// Async sleep implementation.
    pub sleeper: Arc<dyn RetrySleeper>,
    /// Jitter strategy for retry delays.
    pub jitter: Arc<dyn BackoffJitter>,
}

impl Default for LoginPipelineRuntime {
    fn default() -> Self {
        Self {
            sleeper: Arc::new(TokioSleeper),
            jitter: Arc::new(RandomJitter),
        }
    }
}

/// Tokio-based sleeper implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl RetrySleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Adds up to a quarter of the base delay, chosen uniformly at random.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl BackoffJitter for RandomJitter {
    fn jittered_delay(&self, base: Duration, _attempt: u32) -> Duration {
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let max_extra = (base_ms / 4).max(1);
        let extra = rand::thread_rng().gen_range(0..=max_extra);
        Duration::from_millis(base_ms.saturating_add(extra))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Duration::from_millis(0))]
    #[case(Duration::from_millis(200))]
    #[case(Duration::from_secs(5))]
    fn random_jitter_stays_within_a_quarter_of_base(#[case] base: Duration) {
        let base_ms = u64::try_from(base.as_millis()).expect("small duration");
        let ceiling = Duration::from_millis(base_ms + (base_ms / 4).max(1));

        for attempt in 1..=50 {
            let delay = RandomJitter.jittered_delay(base, attempt);
            assert!(delay >= base, "{delay:?} below {base:?}");
            assert!(delay <= ceiling, "{delay:?} above {ceiling:?}");
        }
    }
}
