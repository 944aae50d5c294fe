//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod login_event_queue;
mod login_record_sink;

#[cfg(test)]
pub use login_event_queue::MockLoginEventQueue;
pub use login_event_queue::{AcknowledgeError, LoginEventQueue, QueueMessage, QueueSourceError};
#[cfg(test)]
pub use login_record_sink::MockLoginRecordSink;
pub use login_record_sink::{LoginRecordSink, PersistenceError};
