//! Queue adapters delivering login events.
//!
//! - [`SqsLoginEventQueue`]: Amazon SQS (or an SQS-compatible endpoint such
//!   as LocalStack or ElasticMQ) behind the
//!   [`LoginEventQueue`](crate::domain::ports::LoginEventQueue) port.

mod sqs_login_event_queue;

pub use sqs_login_event_queue::{SqsLoginEventQueue, SqsQueueConfig};
