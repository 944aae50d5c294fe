//! Shared in-memory doubles for pipeline tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::domain::ports::{
    AcknowledgeError, LoginEventQueue, LoginRecordSink, PersistenceError, QueueMessage,
    QueueSourceError,
};
use crate::domain::{BackoffJitter, LoginRecord, RetrySleeper};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Well-formed login event body for `user_id`.
///
/// ```rust
/// use login_pipeline::test_support::pipeline::login_event_body;
///
/// assert!(login_event_body("u1").contains("\"user_id\":\"u1\""));
/// ```
pub fn login_event_body(user_id: &str) -> String {
    json!({
        "user_id": user_id,
        "device": { "type": "mobile", "id": format!("device-{user_id}") },
        "ip": "10.0.0.1",
        "locale": "en-GB",
        "app_version": "3.1.4",
        "create_date": "2024-03-15"
    })
    .to_string()
}

/// First-delivery message whose receipt handle is derived from its id.
pub fn queue_message(message_id: &str, body: impl Into<String>) -> QueueMessage {
    QueueMessage::new(message_id, body, format!("receipt-{message_id}"))
}

/// Queue that replays scripted receive results, then reports empty batches.
#[derive(Default)]
pub struct ScriptedQueue {
    receives: Mutex<VecDeque<Result<Vec<QueueMessage>, QueueSourceError>>>,
    delete_failures: Mutex<HashMap<String, VecDeque<AcknowledgeError>>>,
    deleted: Mutex<Vec<QueueMessage>>,
    deferred: Mutex<Vec<(String, Duration)>>,
    defer_failure: Option<AcknowledgeError>,
    receive_requests: Mutex<Vec<(u32, Duration)>>,
    delete_calls: AtomicUsize,
    cancel_on_receive: Option<CancellationToken>,
}

impl ScriptedQueue {
    /// Queue delivering `batches` in order.
    pub fn with_batches(batches: Vec<Vec<QueueMessage>>) -> Self {
        Self::with_receive_results(batches.into_iter().map(Ok).collect())
    }

    /// Queue replaying raw receive results, failures included.
    pub fn with_receive_results(
        receives: Vec<Result<Vec<QueueMessage>, QueueSourceError>>,
    ) -> Self {
        Self {
            receives: Mutex::new(receives.into()),
            ..Self::default()
        }
    }

    /// Fail the next delete of `message_id` with `error`.
    ///
    /// Repeated calls queue further failures for later deletes of the same id.
    #[must_use]
    pub fn failing_delete(self, message_id: &str, error: AcknowledgeError) -> Self {
        lock(&self.delete_failures)
            .entry(message_id.to_owned())
            .or_default()
            .push_back(error);
        self
    }

    /// Fail every visibility extension with `error`.
    #[must_use]
    pub fn failing_deferral(mut self, error: AcknowledgeError) -> Self {
        self.defer_failure = Some(error);
        self
    }

    /// Cancel `token` whenever a receive call is made.
    #[must_use]
    pub fn cancelling_on_receive(mut self, token: CancellationToken) -> Self {
        self.cancel_on_receive = Some(token);
        self
    }

    /// Message ids successfully deleted, in order.
    pub fn deleted_ids(&self) -> Vec<String> {
        lock(&self.deleted)
            .iter()
            .map(|message| message.message_id.clone())
            .collect()
    }

    /// `(message_id, timeout)` of every visibility extension requested.
    pub fn deferred(&self) -> Vec<(String, Duration)> {
        lock(&self.deferred).clone()
    }

    /// Number of receive calls made.
    pub fn receive_calls(&self) -> usize {
        lock(&self.receive_requests).len()
    }

    /// `(max_messages, wait_time)` arguments of every receive call.
    pub fn receive_requests(&self) -> Vec<(u32, Duration)> {
        lock(&self.receive_requests).clone()
    }

    /// Number of delete calls made, failed ones included.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LoginEventQueue for ScriptedQueue {
    async fn receive_batch(
        &self,
        max_messages: u32,
        wait_time: Duration,
    ) -> Result<Vec<QueueMessage>, QueueSourceError> {
        lock(&self.receive_requests).push((max_messages, wait_time));
        if let Some(token) = &self.cancel_on_receive {
            token.cancel();
        }
        lock(&self.receives).pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), AcknowledgeError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let failure = lock(&self.delete_failures)
            .get_mut(&message.message_id)
            .and_then(VecDeque::pop_front);
        if let Some(error) = failure {
            return Err(error);
        }
        lock(&self.deleted).push(message.clone());
        Ok(())
    }

    async fn extend_visibility(
        &self,
        message: &QueueMessage,
        timeout: Duration,
    ) -> Result<(), AcknowledgeError> {
        lock(&self.deferred).push((message.message_id.clone(), timeout));
        self.defer_failure.clone().map_or(Ok(()), Err)
    }
}

/// Sink that records committed rows and replays scripted failures.
#[derive(Default)]
pub struct RecordingSink {
    scripted: Mutex<VecDeque<Result<(), PersistenceError>>>,
    persisted: Mutex<Vec<LoginRecord>>,
    calls: AtomicUsize,
}

impl RecordingSink {
    /// Sink whose first calls return `scripted` in order; later calls succeed.
    pub fn scripted(scripted: Vec<Result<(), PersistenceError>>) -> Self {
        Self {
            scripted: Mutex::new(scripted.into()),
            ..Self::default()
        }
    }

    /// Rows committed so far.
    pub fn persisted(&self) -> Vec<LoginRecord> {
        lock(&self.persisted).clone()
    }

    /// Number of persist calls made, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LoginRecordSink for RecordingSink {
    async fn persist(&self, record: &LoginRecord) -> Result<(), PersistenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.scripted).pop_front().unwrap_or(Ok(()))?;
        lock(&self.persisted).push(record.clone());
        Ok(())
    }
}

/// Sleeper that returns immediately and records requested delays.
#[derive(Default)]
pub struct RecordingSleeper(Mutex<Vec<Duration>>);

impl RecordingSleeper {
    /// Delays requested so far.
    pub fn delays(&self) -> Vec<Duration> {
        lock(&self.0).clone()
    }
}

#[async_trait]
impl RetrySleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        lock(&self.0).push(duration);
    }
}

/// Jitter that leaves the base delay untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl BackoffJitter for NoJitter {
    fn jittered_delay(&self, base: Duration, _attempt: u32) -> Duration {
        base
    }
}
