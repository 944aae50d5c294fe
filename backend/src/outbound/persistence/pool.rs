//! Async connection pool for the login record store.
//!
//! Wraps `diesel-async` with `bb8`. A pipeline worker inserts one row at a
//! time, so the defaults keep the pool small and lazily filled: idle
//! connections are not pre-opened and checkout waits at most the configured
//! timeout before reporting [`PoolError::Checkout`].

use std::time::Duration;

use diesel_async::AsyncPgConnection;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};

/// Errors raised while building the pool or checking out a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// No connection became available within the checkout timeout.
    #[error("failed to get connection from pool: {message}")]
    Checkout { message: String },

    /// The pool could not be constructed.
    #[error("failed to build connection pool: {message}")]
    Build { message: String },
}

impl PoolError {
    /// Create a checkout error with the given message.
    pub fn checkout(message: impl Into<String>) -> Self {
        Self::Checkout {
            message: message.into(),
        }
    }

    /// Create a build error with the given message.
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
        }
    }

    /// Human-readable detail without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Checkout { message } | Self::Build { message } => message,
        }
    }
}

/// Pool sizing and timeouts.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use login_pipeline::outbound::persistence::PoolConfig;
///
/// let config = PoolConfig::new("postgres://pipeline@localhost/logins")
///     .with_max_size(4)
///     .with_connection_timeout(Duration::from_secs(5));
/// assert_eq!(config.max_size(), 4);
/// assert_eq!(config.connection_timeout(), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    database_url: String,
    max_size: u32,
    min_idle: Option<u32>,
    connection_timeout: Duration,
}

impl PoolConfig {
    /// Defaults: two connections, none kept idle, 30 second checkout timeout.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_size: 2,
            min_idle: None,
            connection_timeout: Duration::from_secs(30),
        }
    }

    /// Set the maximum number of connections; zero is raised to one.
    #[must_use]
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    /// Set the number of idle connections to keep open.
    #[must_use]
    pub fn with_min_idle(mut self, min_idle: Option<u32>) -> Self {
        self.min_idle = min_idle;
        self
    }

    /// Set the connection checkout timeout.
    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Database connection string.
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Maximum number of pooled connections.
    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    /// Checkout timeout.
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }
}

/// Cloneable handle to the PostgreSQL pool.
#[derive(Clone)]
pub struct DbPool {
    inner: Pool<AsyncPgConnection>,
}

impl DbPool {
    /// Build the pool.
    ///
    /// With no idle minimum, no connection is opened until the first
    /// checkout, so an unreachable database surfaces as a checkout error.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Build`] if bb8 rejects the configuration.
    pub async fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.database_url);

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(config.min_idle)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|err| PoolError::build(err.to_string()))?;

        Ok(Self { inner: pool })
    }

    /// Check out a connection.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Checkout`] if no connection is available within
    /// the configured timeout.
    pub async fn get(&self) -> Result<PooledConnection<'_, AsyncPgConnection>, PoolError> {
        self.inner
            .get()
            .await
            .map_err(|err| PoolError::checkout(err.to_string()))
    }
}
