//! Domain port describing the at-least-once queue that delivers login events.
//!
//! The queue hands out short batches of messages and keeps each one hidden
//! until it is deleted or its visibility timeout lapses. Deleting a message is
//! the only acknowledgement; anything left undeleted is redelivered.

use std::time::Duration;

use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    /// Errors raised while reaching or receiving from the queue.
    pub enum QueueSourceError {
        /// Queue infrastructure could not be reached.
        Unavailable { message: String } => "login event queue is unavailable: {message}"; retryable = true,
        /// The queue service refused the request (unknown queue, access denied).
        Rejected { message: String } => "login event queue rejected the request: {message}",
    }
}

define_port_error! {
    /// Errors raised while deleting a processed message.
    pub enum AcknowledgeError {
        /// The receipt handle expired or was superseded by a redelivery.
        StaleReceipt { message: String } => "receipt handle is stale or expired: {message}",
        /// The delete request did not reach the queue service.
        Unavailable { message: String } => "login event queue is unavailable for delete: {message}"; retryable = true,
    }
}

/// One delivery of a queue message.
///
/// A redelivered message carries the same `message_id` and body but a fresh
/// `receipt_handle` and a higher `receive_count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Queue-assigned identifier, stable across redeliveries.
    pub message_id: String,
    /// Raw payload.
    pub body: String,
    /// Opaque handle required to delete this delivery.
    pub receipt_handle: String,
    /// Number of times the queue has delivered the message, including this one.
    pub receive_count: u32,
}

impl QueueMessage {
    /// Build a first-delivery message.
    ///
    /// # Example
    ///
    /// ```
    /// use login_pipeline::domain::ports::QueueMessage;
    ///
    /// let message = QueueMessage::new("m-1", "{}", "receipt-1");
    /// assert_eq!(message.receive_count, 1);
    /// ```
    pub fn new(
        message_id: impl Into<String>,
        body: impl Into<String>,
        receipt_handle: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            body: body.into(),
            receipt_handle: receipt_handle.into(),
            receive_count: 1,
        }
    }

    /// Record how many times the queue has delivered this message.
    #[must_use]
    pub fn with_receive_count(mut self, receive_count: u32) -> Self {
        self.receive_count = receive_count;
        self
    }
}

/// Batched receive and explicit per-message delete.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LoginEventQueue: Send + Sync {
    /// Receive up to `max_messages`, waiting at most `wait_time` for any to
    /// arrive.
    ///
    /// An empty batch means nothing is currently available; it does not mean
    /// the queue is closed. Batches may be shorter than `max_messages` even
    /// when more messages are queued.
    async fn receive_batch(
        &self,
        max_messages: u32,
        wait_time: Duration,
    ) -> Result<Vec<QueueMessage>, QueueSourceError>;

    /// Delete one delivery so it is not redelivered.
    async fn delete(&self, message: &QueueMessage) -> Result<(), AcknowledgeError>;

    /// Hide one delivery for `timeout` without deleting it.
    async fn extend_visibility(
        &self,
        message: &QueueMessage,
        timeout: Duration,
    ) -> Result<(), AcknowledgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn unavailable_queue_errors_are_retryable() {
        assert!(QueueSourceError::unavailable("dns failure").is_retryable());
        assert!(!QueueSourceError::rejected("queue does not exist").is_retryable());
    }

    #[rstest]
    fn stale_receipts_are_not_retryable() {
        assert!(!AcknowledgeError::stale_receipt("expired").is_retryable());
        assert!(AcknowledgeError::unavailable("timeout").is_retryable());
    }

    #[rstest]
    fn receive_count_builder_overrides_default() {
        let message = QueueMessage::new("m-1", "{}", "r-1").with_receive_count(4);
        assert_eq!(message.receive_count, 4);
        assert_eq!(message.receipt_handle, "r-1");
    }
}
