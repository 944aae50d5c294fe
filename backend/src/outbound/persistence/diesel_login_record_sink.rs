//! PostgreSQL-backed login record sink.

use std::time::Duration;

use async_trait::async_trait;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_query;
use diesel::sql_types::{Date, Integer, Text};
use diesel_async::RunQueryDsl;
use tracing::debug;

use crate::domain::LoginRecord;
use crate::domain::ports::{LoginRecordSink, PersistenceError};

use super::pool::{DbPool, PoolError};

/// The table has no primary key, so rows are written with a plain
/// parameterized insert rather than a Diesel `table!` mapping.
const INSERT_LOGIN_SQL: &str = r#"
INSERT INTO user_logins (
    user_id,
    device_type,
    masked_ip,
    masked_device_id,
    locale,
    app_version,
    create_date
)
VALUES ($1, $2, $3, $4, $5, $6, $7)
"#;

/// Diesel-backed implementation of the login record sink port.
///
/// Each call checks out a pooled connection and runs one autocommitted
/// insert, bounded by the statement timeout.
#[derive(Clone)]
pub struct DieselLoginRecordSink {
    pool: DbPool,
    statement_timeout: Duration,
}

impl DieselLoginRecordSink {
    /// Default bound on checkout plus insert.
    pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a sink over `pool`.
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            statement_timeout: Self::DEFAULT_STATEMENT_TIMEOUT,
        }
    }

    /// Override the bound on checkout plus insert.
    #[must_use]
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    async fn insert(&self, record: &LoginRecord) -> Result<(), PersistenceError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        sql_query(INSERT_LOGIN_SQL)
            .bind::<Text, _>(record.user_id.as_str())
            .bind::<Text, _>(record.device_type.as_str())
            .bind::<Text, _>(record.masked_ip.as_str())
            .bind::<Text, _>(record.masked_device_id.as_str())
            .bind::<Text, _>(record.locale.as_str())
            .bind::<Integer, _>(record.app_version)
            .bind::<Date, _>(record.create_date)
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(map_diesel_error)
    }
}

fn map_pool_error(error: PoolError) -> PersistenceError {
    PersistenceError::connection(error.message())
}

fn map_diesel_error(error: DieselError) -> PersistenceError {
    match &error {
        DieselError::DatabaseError(kind, info) => {
            debug!(?kind, message = info.message(), "login record insert failed");
        }
        _ => debug!(
            error_type = %std::any::type_name_of_val(&error),
            "login record insert failed"
        ),
    }

    match error {
        DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation
            | DatabaseErrorKind::ForeignKeyViolation
            | DatabaseErrorKind::NotNullViolation
            | DatabaseErrorKind::CheckViolation,
            info,
        ) => PersistenceError::constraint(info.message()),
        DieselError::DatabaseError(
            DatabaseErrorKind::ClosedConnection | DatabaseErrorKind::UnableToSendCommand,
            info,
        ) => PersistenceError::connection(info.message()),
        DieselError::BrokenTransactionManager => {
            PersistenceError::connection("connection left in a broken transaction state")
        }
        DieselError::DatabaseError(_, info) => PersistenceError::query(info.message()),
        other => PersistenceError::query(other.to_string()),
    }
}

#[async_trait]
impl LoginRecordSink for DieselLoginRecordSink {
    async fn persist(&self, record: &LoginRecord) -> Result<(), PersistenceError> {
        tokio::time::timeout(self.statement_timeout, self.insert(record))
            .await
            .map_err(|_| {
                PersistenceError::timeout(format!(
                    "no commit within {}ms",
                    self.statement_timeout.as_millis()
                ))
            })?
    }
}
