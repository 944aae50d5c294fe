//! Domain port for durably persisting transformed login records.
use async_trait::async_trait;

use crate::domain::LoginRecord;

use super::define_port_error;

define_port_error! {
    /// Errors raised by login record persistence adapters.
    pub enum PersistenceError {
        /// The store could not be reached or the connection dropped.
        Connection { message: String } => "login record store connection failed: {message}"; retryable = true,
        /// The write did not complete within the configured timeout.
        Timeout { message: String } => "login record write timed out: {message}"; retryable = true,
        /// The row violates a table constraint.
        Constraint { message: String } => "login record violates a store constraint: {message}",
        /// The insert failed for any other reason.
        Query { message: String } => "login record insert failed: {message}",
    }
}

/// Inserts one row per call.
///
/// Implementations must commit before returning `Ok`. They perform no
/// deduplication: persisting an identical record twice yields two rows.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LoginRecordSink: Send + Sync {
    /// Insert and commit `record`.
    async fn persist(&self, record: &LoginRecord) -> Result<(), PersistenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(PersistenceError::connection("reset by peer"), true)]
    #[case(PersistenceError::timeout("5s elapsed"), true)]
    #[case(PersistenceError::constraint("not null"), false)]
    #[case(PersistenceError::query("syntax"), false)]
    fn transient_failures_are_retryable(#[case] error: PersistenceError, #[case] expected: bool) {
        assert_eq!(error.is_retryable(), expected);
    }
}
