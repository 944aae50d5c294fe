//! Amazon SQS implementation of the login event queue port.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_sqs::Client;
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::types::{Message, MessageSystemAttributeName};
use tracing::{debug, info, warn};

use crate::domain::ports::{AcknowledgeError, LoginEventQueue, QueueMessage, QueueSourceError};

/// Error codes meaning the request will never succeed as issued.
const REJECTION_CODES: &[&str] = &[
    "AWS.SimpleQueueService.NonExistentQueue",
    "QueueDoesNotExist",
    "InvalidAddress",
    "InvalidSecurity",
    "AccessDenied",
    "AccessDeniedException",
    "InvalidClientTokenId",
    "UnrecognizedClientException",
];

/// Connection settings for [`SqsLoginEventQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqsQueueConfig {
    /// Queue looked up by name when `queue_url` is unset.
    pub queue_name: String,
    /// Full queue URL; skips the name lookup.
    pub queue_url: Option<String>,
    /// Custom service endpoint, e.g. LocalStack.
    pub endpoint_url: Option<String>,
    /// AWS region; the default provider chain decides when unset.
    pub region: Option<String>,
    /// Visibility timeout applied to received messages; the queue's own
    /// setting applies when unset.
    pub visibility_timeout: Option<Duration>,
    /// Bound on one SQS call, retries inside the SDK included. Must exceed
    /// the long-poll wait.
    pub operation_timeout: Duration,
}

impl SqsQueueConfig {
    /// Default bound on one SQS call.
    pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

    /// Settings for the named queue with every optional field unset.
    pub fn named(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            queue_url: None,
            endpoint_url: None,
            region: None,
            visibility_timeout: None,
            operation_timeout: Self::DEFAULT_OPERATION_TIMEOUT,
        }
    }

    fn timeout_config(&self) -> TimeoutConfig {
        TimeoutConfig::builder()
            .operation_timeout(self.operation_timeout)
            .build()
    }
}

/// SQS-backed [`LoginEventQueue`].
#[derive(Debug, Clone)]
pub struct SqsLoginEventQueue {
    client: Client,
    queue_url: String,
    visibility_timeout_seconds: Option<i32>,
}

impl SqsLoginEventQueue {
    /// Load AWS configuration, build a client and resolve the queue URL.
    ///
    /// # Errors
    ///
    /// Returns [`QueueSourceError`] when the queue URL cannot be resolved.
    pub async fn connect(config: &SqsQueueConfig) -> Result<Self, QueueSourceError> {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).timeout_config(config.timeout_config());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let client = Client::new(&loader.load().await);

        let queue_url = match &config.queue_url {
            Some(url) => url.clone(),
            None => resolve_queue_url(&client, &config.queue_name).await?,
        };
        info!(%queue_url, "connected to login event queue");

        Ok(Self::from_client(client, queue_url).with_visibility_timeout(config.visibility_timeout))
    }

    /// Wrap an existing client and a known queue URL.
    pub fn from_client(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            visibility_timeout_seconds: None,
        }
    }

    /// Override the visibility timeout requested on receive.
    #[must_use]
    pub fn with_visibility_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.visibility_timeout_seconds =
            timeout.map(|value| i32::try_from(value.as_secs()).unwrap_or(i32::MAX));
        self
    }

    /// Resolved queue URL.
    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

async fn resolve_queue_url(client: &Client, queue_name: &str) -> Result<String, QueueSourceError> {
    let output = client
        .get_queue_url()
        .queue_name(queue_name)
        .send()
        .await
        .map_err(|error| map_receive_error(&error))?;
    output
        .queue_url()
        .map(str::to_owned)
        .ok_or_else(|| QueueSourceError::rejected(format!("no URL returned for queue {queue_name}")))
}

fn is_rejection_code(code: Option<&str>) -> bool {
    code.is_some_and(|code| REJECTION_CODES.contains(&code))
}

fn map_receive_error<E, R>(error: &SdkError<E, R>) -> QueueSourceError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(error).to_string();
    if is_rejection_code(error.code()) {
        QueueSourceError::rejected(message)
    } else {
        QueueSourceError::unavailable(message)
    }
}

/// Timeouts and dispatch failures surface as `Unavailable`; only a receipt
/// the service recognised as stale is terminal.
fn map_acknowledge_error<E, R>(error: &SdkError<E, R>, stale: bool) -> AcknowledgeError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = DisplayErrorContext(error).to_string();
    if stale {
        AcknowledgeError::stale_receipt(detail)
    } else {
        AcknowledgeError::unavailable(detail)
    }
}

fn receive_count(message: &Message) -> u32 {
    message
        .attributes()
        .and_then(|attributes| attributes.get(&MessageSystemAttributeName::ApproximateReceiveCount))
        .and_then(|count| count.parse().ok())
        .unwrap_or(1)
}

/// Convert an SDK message; messages without a receipt handle cannot be
/// acknowledged and are skipped.
fn to_queue_message(message: &Message) -> Option<QueueMessage> {
    let message_id = message.message_id().unwrap_or_default();
    let Some(receipt_handle) = message.receipt_handle() else {
        warn!(message_id, "skipping queue message without a receipt handle");
        return None;
    };
    Some(
        QueueMessage::new(
            message_id,
            message.body().unwrap_or_default(),
            receipt_handle,
        )
        .with_receive_count(receive_count(message)),
    )
}

fn saturating_i32(value: u64) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[async_trait]
impl LoginEventQueue for SqsLoginEventQueue {
    async fn receive_batch(
        &self,
        max_messages: u32,
        wait_time: Duration,
    ) -> Result<Vec<QueueMessage>, QueueSourceError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(saturating_i32(u64::from(max_messages)))
            .wait_time_seconds(saturating_i32(wait_time.as_secs()))
            .set_visibility_timeout(self.visibility_timeout_seconds)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|error| map_receive_error(&error))?;

        let messages = output.messages();
        debug!(received = messages.len(), "sqs receive completed");
        Ok(messages.iter().filter_map(to_queue_message).collect())
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), AcknowledgeError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.receipt_handle)
            .send()
            .await
            .map(|_| ())
            .map_err(|error| {
                let stale = error.as_service_error().is_some_and(|service| {
                    service.is_receipt_handle_is_invalid() || service.is_invalid_id_format()
                });
                map_acknowledge_error(&error, stale)
            })
    }

    async fn extend_visibility(
        &self,
        message: &QueueMessage,
        timeout: Duration,
    ) -> Result<(), AcknowledgeError> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.receipt_handle)
            .visibility_timeout(saturating_i32(timeout.as_secs()))
            .send()
            .await
            .map(|_| ())
            .map_err(|error| {
                let stale = error.as_service_error().is_some_and(|service| {
                    service.is_receipt_handle_is_invalid() || service.is_message_not_inflight()
                });
                map_acknowledge_error(&error, stale)
            })
    }
}
