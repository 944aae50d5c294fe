//! Domain orchestration of the consume, transform, persist and acknowledge loop.
//!
//! The driver owns batch iteration, per-message failure isolation, retry
//! policy (jittered exponential backoff) and run termination. A message is
//! deleted from the queue only after its own row has been committed.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::ports::{
    AcknowledgeError, LoginEventQueue, LoginRecordSink, PersistenceError, QueueMessage,
    QueueSourceError,
};
use crate::domain::{MalformedPayload, mask, transform};

mod attempt_error;
mod policy;
mod runtime;
mod state;

use attempt_error::AttemptFailure;
pub use policy::RetryPolicy;
pub use runtime::{
    BackoffJitter, LoginPipelinePorts, LoginPipelineRuntime, RandomJitter, RetrySleeper,
    TokioSleeper,
};
use state::{MessageOutcome, PipelineState};
pub use state::{MessageCounts, RunSummary, RunTermination};

/// Largest batch the queue protocol accepts per receive.
pub const MAX_BATCH_SIZE: u32 = 10;

/// Longest long-poll wait the queue protocol accepts.
pub const MAX_WAIT_TIME: Duration = Duration::from_secs(20);

/// Longest visibility timeout the queue protocol accepts.
pub const MAX_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(43_200);

/// Driver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Messages requested per receive, clamped to `1..=MAX_BATCH_SIZE`.
    pub max_messages: u32,
    /// Long-poll wait per receive, capped at [`MAX_WAIT_TIME`].
    pub wait_time: Duration,
    /// Retry budget for receive, persist and delete calls.
    pub retry: RetryPolicy,
    /// Receive count at which a malformed message is reported as poison.
    pub poison_receive_threshold: u32,
    /// How long a poison message is hidden before its next redelivery,
    /// capped at [`MAX_VISIBILITY_TIMEOUT`].
    pub poison_visibility_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_messages: MAX_BATCH_SIZE,
            wait_time: MAX_WAIT_TIME,
            retry: RetryPolicy::default(),
            poison_receive_threshold: 5,
            poison_visibility_timeout: MAX_VISIBILITY_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    /// Clamp receive parameters to what the queue protocol accepts.
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use login_pipeline::domain::PipelineConfig;
    ///
    /// let config = PipelineConfig {
    ///     max_messages: 50,
    ///     wait_time: Duration::from_secs(60),
    ///     ..PipelineConfig::default()
    /// }
    /// .clamped();
    /// assert_eq!(config.max_messages, 10);
    /// assert_eq!(config.wait_time, Duration::from_secs(20));
    /// ```
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            max_messages: self.max_messages.clamp(1, MAX_BATCH_SIZE),
            wait_time: self.wait_time.min(MAX_WAIT_TIME),
            poison_visibility_timeout: self.poison_visibility_timeout.min(MAX_VISIBILITY_TIMEOUT),
            ..self
        }
    }
}

/// Infrastructure failures that end a run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// The queue could not be polled within the retry budget.
    #[error("login event queue unavailable after {attempts} attempt(s): {source}")]
    QueueUnavailable {
        /// Receive calls made before giving up.
        attempts: u32,
        /// Last receive failure.
        source: QueueSourceError,
    },
    /// The store stayed unreachable beyond the retry budget.
    #[error("login record store unavailable after {attempts} attempt(s): {source}")]
    StoreUnavailable {
        /// Persist calls made before giving up.
        attempts: u32,
        /// Last persistence failure.
        source: PersistenceError,
    },
}

/// Single-worker login event pipeline.
pub struct LoginPipeline {
    queue: Arc<dyn LoginEventQueue>,
    sink: Arc<dyn LoginRecordSink>,
    sleeper: Arc<dyn RetrySleeper>,
    jitter: Arc<dyn BackoffJitter>,
    config: PipelineConfig,
}

impl LoginPipeline {
    /// Build a pipeline using default runtime dependencies.
    /// ```rust,ignore
    /// let pipeline = LoginPipeline::new(ports, PipelineConfig::default());
    /// ```
    pub fn new(ports: LoginPipelinePorts, config: PipelineConfig) -> Self {
        Self::with_runtime(ports, LoginPipelineRuntime::default(), config)
    }

    /// Build a pipeline with injected runtime abstractions.
    /// ```rust,ignore
    /// let pipeline = LoginPipeline::with_runtime(ports, runtime, config);
    /// ```
    pub fn with_runtime(
        ports: LoginPipelinePorts,
        runtime: LoginPipelineRuntime,
        config: PipelineConfig,
    ) -> Self {
        Self {
            queue: ports.queue,
            sink: ports.sink,
            sleeper: runtime.sleeper,
            jitter: runtime.jitter,
            config: config.clamped(),
        }
    }

    /// Poll and process batches until the queue drains or `shutdown` fires.
    ///
    /// Cancellation is observed between batches only: a batch that has been
    /// received is always processed to completion first.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the queue or the store stays
    /// unreachable beyond the retry budget. Per-message failures never end
    /// the run.
    pub async fn run(&self, shutdown: &CancellationToken) -> Result<RunSummary, PipelineError> {
        let mut counts = MessageCounts::default();
        let mut state = PipelineState::Polling;

        loop {
            state = match state {
                PipelineState::Polling => self.poll(shutdown).await,
                PipelineState::ProcessingBatch(batch) => self
                    .process_batch(batch, &mut counts)
                    .await
                    .map(|()| PipelineState::Polling),
                PipelineState::Drained => {
                    return Ok(Self::finish(RunTermination::Drained, counts));
                }
                PipelineState::Stopped => {
                    return Ok(Self::finish(RunTermination::Stopped, counts));
                }
            }
            .inspect_err(|error| {
                error!(
                    error = %error,
                    batches = counts.batches,
                    persisted = counts.persisted,
                    acknowledged = counts.acknowledged,
                    "login pipeline aborted"
                );
            })?;
        }
    }

    async fn poll(&self, shutdown: &CancellationToken) -> Result<PipelineState, PipelineError> {
        if shutdown.is_cancelled() {
            info!("stop requested; not polling for another batch");
            return Ok(PipelineState::Stopped);
        }

        let received = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                info!("stop requested while waiting for messages");
                return Ok(PipelineState::Stopped);
            }
            received = self.receive_batch() => received,
        };

        let batch = received.map_err(|failure| PipelineError::QueueUnavailable {
            attempts: failure.attempts,
            source: failure.error,
        })?;

        if batch.is_empty() {
            debug!("queue returned an empty batch");
            Ok(PipelineState::Drained)
        } else {
            debug!(batch_size = batch.len(), "received login event batch");
            Ok(PipelineState::ProcessingBatch(batch))
        }
    }

    async fn receive_batch(&self) -> Result<Vec<QueueMessage>, AttemptFailure<QueueSourceError>> {
        self.with_retry(
            "receive",
            || {
                self.queue
                    .receive_batch(self.config.max_messages, self.config.wait_time)
            },
            QueueSourceError::is_retryable,
        )
        .await
    }

    async fn process_batch(
        &self,
        batch: Vec<QueueMessage>,
        counts: &mut MessageCounts,
    ) -> Result<(), PipelineError> {
        counts.record_batch(batch.len());
        for message in &batch {
            let outcome = self.process_message(message).await?;
            counts.record(outcome);
        }
        Ok(())
    }

    async fn process_message(&self, message: &QueueMessage) -> Result<MessageOutcome, PipelineError> {
        let record = match transform(&message.body) {
            Ok(record) => record,
            Err(error) => {
                self.report_malformed(message, &error).await;
                return Ok(MessageOutcome::Malformed);
            }
        };

        let persisted = self
            .with_retry(
                "persist",
                || self.sink.persist(&record),
                PersistenceError::is_retryable,
            )
            .await;
        if let Err(failure) = persisted {
            if failure.error.is_retryable() {
                return Err(PipelineError::StoreUnavailable {
                    attempts: failure.attempts,
                    source: failure.error,
                });
            }
            warn!(
                message_id = %message.message_id,
                error = %failure.error,
                "store rejected login record; leaving message for redelivery"
            );
            return Ok(MessageOutcome::PersistFailed);
        }

        info!(
            message_id = %message.message_id,
            payload_digest = %mask(&message.body),
            "persisted login record"
        );

        let acknowledged = self
            .with_retry(
                "delete",
                || self.queue.delete(message),
                AcknowledgeError::is_retryable,
            )
            .await;
        match acknowledged {
            Ok(()) => {
                debug!(message_id = %message.message_id, "acknowledged login event");
                Ok(MessageOutcome::Acknowledged)
            }
            Err(failure) => {
                warn!(
                    message_id = %message.message_id,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "login record persisted but message not acknowledged; redelivery will duplicate the row"
                );
                Ok(MessageOutcome::AcknowledgeFailed)
            }
        }
    }

    async fn report_malformed(&self, message: &QueueMessage, error: &MalformedPayload) {
        if message.receive_count < self.config.poison_receive_threshold {
            warn!(
                message_id = %message.message_id,
                receive_count = message.receive_count,
                error = %error,
                "malformed login event left on the queue"
            );
            return;
        }

        error!(
            message_id = %message.message_id,
            receive_count = message.receive_count,
            error = %error,
            "poison login event reached the redelivery threshold; deferring it for queue redrive"
        );
        let timeout = self.config.poison_visibility_timeout;
        if let Err(defer_error) = self.queue.extend_visibility(message, timeout).await {
            warn!(
                message_id = %message.message_id,
                error = %defer_error,
                "could not defer poison login event"
            );
        }
    }

    async fn with_retry<T, E, F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
        is_retryable: fn(&E) -> bool,
    ) -> Result<T, AttemptFailure<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let policy = self.config.retry;
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if is_retryable(&error) && policy.allows_retry_after(attempt) => {
                    let delay = self
                        .jitter
                        .jittered_delay(policy.base_delay(attempt), attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "transient failure; retrying"
                    );
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    return Err(AttemptFailure {
                        error,
                        attempts: attempt,
                    });
                }
            }
        }
    }

    fn finish(termination: RunTermination, counts: MessageCounts) -> RunSummary {
        info!(
            ?termination,
            batches = counts.batches,
            received = counts.received,
            persisted = counts.persisted,
            acknowledged = counts.acknowledged,
            malformed = counts.malformed,
            persist_failures = counts.persist_failures,
            acknowledge_failures = counts.acknowledge_failures,
            "login pipeline finished"
        );
        RunSummary {
            termination,
            counts,
        }
    }
}
