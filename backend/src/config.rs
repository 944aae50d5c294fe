//! Pipeline settings loaded via OrthoConfig.
//!
//! Values come from CLI flags, `LOGIN_PIPELINE_*` environment variables or a
//! configuration file. Unset values fall back to the defaults declared on
//! each field; the database URL and queue endpoint additionally honour the
//! conventional `DATABASE_URL` and `AWS_ENDPOINT_URL` variables.

use std::env;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::domain::{PipelineConfig, RetryPolicy};
use crate::outbound::persistence::PoolConfig;
use crate::outbound::queue::SqsQueueConfig;

const DEFAULT_QUEUE_NAME: &str = "user-logins-queue";

/// Headroom kept between the long-poll wait and the SQS call timeout.
const OPERATION_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Settings that cannot be turned into adapter configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// Neither the setting nor `DATABASE_URL` is present.
    #[error("database URL missing: set LOGIN_PIPELINE_DATABASE_URL, --database-url or DATABASE_URL")]
    MissingDatabaseUrl,
    /// A database URL was supplied but is blank.
    #[error("{source_name} must not be empty")]
    EmptyDatabaseUrl { source_name: &'static str },
}

/// Configuration for one pipeline worker process.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "LOGIN_PIPELINE")]
pub struct PipelineSettings {
    /// Queue name resolved to a URL at startup.
    pub queue_name: Option<String>,
    /// Full queue URL; skips the name lookup.
    pub queue_url: Option<String>,
    /// Custom SQS endpoint such as LocalStack.
    pub endpoint_url: Option<String>,
    /// AWS region override.
    pub region: Option<String>,
    /// PostgreSQL connection string.
    pub database_url: Option<String>,
    /// Messages requested per receive (1 to 10).
    #[ortho_config(default = 10)]
    pub max_messages: u32,
    /// Long-poll wait per receive in seconds (at most 20).
    #[ortho_config(default = 20)]
    pub wait_time_seconds: u64,
    /// Visibility timeout requested on receive, in seconds.
    pub visibility_timeout_seconds: Option<u64>,
    /// Bound on one SQS call in seconds; raised to exceed the long-poll wait.
    #[ortho_config(default = 30)]
    pub operation_timeout_seconds: u64,
    /// Calls per receive, persist or delete before giving up.
    #[ortho_config(default = 3)]
    pub max_attempts: u32,
    /// First retry delay in milliseconds.
    #[ortho_config(default = 200)]
    pub initial_backoff_ms: u64,
    /// Retry delay ceiling in milliseconds.
    #[ortho_config(default = 5000)]
    pub max_backoff_ms: u64,
    /// Receive count at which a malformed message is reported as poison.
    #[ortho_config(default = 5)]
    pub poison_receive_threshold: u32,
    /// Seconds a poison message stays hidden before redelivery (at most 43200).
    #[ortho_config(default = 43200)]
    pub poison_visibility_timeout_seconds: u64,
    /// Database pool size.
    #[ortho_config(default = 2)]
    pub db_max_connections: u32,
    /// Database checkout timeout in seconds.
    #[ortho_config(default = 30)]
    pub db_connection_timeout_seconds: u64,
    /// Bound on a single insert, checkout included, in seconds.
    #[ortho_config(default = 30)]
    pub db_statement_timeout_seconds: u64,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

impl PipelineSettings {
    /// Queue name, falling back to `user-logins-queue`.
    pub fn queue_name(&self) -> &str {
        self.queue_name.as_deref().unwrap_or(DEFAULT_QUEUE_NAME)
    }

    /// Queue endpoint, falling back to `AWS_ENDPOINT_URL`.
    pub fn endpoint_url(&self) -> Option<String> {
        non_blank(self.endpoint_url.clone())
            .or_else(|| non_blank(env::var("AWS_ENDPOINT_URL").ok()))
    }

    /// Database URL, falling back to `DATABASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] when no URL is configured or the configured
    /// one is blank.
    pub fn database_url(&self) -> Result<String, SettingsError> {
        if let Some(value) = &self.database_url {
            if value.trim().is_empty() {
                return Err(SettingsError::EmptyDatabaseUrl {
                    source_name: "database_url",
                });
            }
            return Ok(value.clone());
        }

        let from_env = env::var("DATABASE_URL").map_err(|_| SettingsError::MissingDatabaseUrl)?;
        if from_env.trim().is_empty() {
            return Err(SettingsError::EmptyDatabaseUrl {
                source_name: "DATABASE_URL",
            });
        }
        Ok(from_env)
    }

    /// Driver configuration; receive parameters are clamped to SQS limits.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_messages: self.max_messages,
            wait_time: Duration::from_secs(self.wait_time_seconds),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
            },
            poison_receive_threshold: self.poison_receive_threshold,
            poison_visibility_timeout: Duration::from_secs(self.poison_visibility_timeout_seconds),
        }
        .clamped()
    }

    /// Pool configuration for the login record store.
    ///
    /// # Errors
    ///
    /// Propagates [`PipelineSettings::database_url`] failures.
    pub fn pool_config(&self) -> Result<PoolConfig, SettingsError> {
        Ok(PoolConfig::new(self.database_url()?)
            .with_max_size(self.db_max_connections)
            .with_connection_timeout(Duration::from_secs(
                self.db_connection_timeout_seconds,
            )))
    }

    /// Bound on a single insert.
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.db_statement_timeout_seconds)
    }

    /// SQS connection settings.
    ///
    /// The call timeout is raised above the clamped long-poll wait so an
    /// idle receive is never cut short.
    pub fn queue_config(&self) -> SqsQueueConfig {
        let floor = self.pipeline_config().wait_time + OPERATION_TIMEOUT_MARGIN;
        SqsQueueConfig {
            queue_name: self.queue_name().to_owned(),
            queue_url: non_blank(self.queue_url.clone()),
            endpoint_url: self.endpoint_url(),
            region: non_blank(self.region.clone()),
            visibility_timeout: self.visibility_timeout_seconds.map(Duration::from_secs),
            operation_timeout: Duration::from_secs(self.operation_timeout_seconds).max(floor),
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for pipeline settings parsing and fallbacks.

    use super::*;
    use std::ffi::OsString;

    use env_lock::lock_env;
    use rstest::rstest;

    use crate::domain::MAX_VISIBILITY_TIMEOUT;

    const SETTINGS_VARS: [&str; 17] = [
        "LOGIN_PIPELINE_QUEUE_NAME",
        "LOGIN_PIPELINE_QUEUE_URL",
        "LOGIN_PIPELINE_ENDPOINT_URL",
        "LOGIN_PIPELINE_REGION",
        "LOGIN_PIPELINE_DATABASE_URL",
        "LOGIN_PIPELINE_MAX_MESSAGES",
        "LOGIN_PIPELINE_WAIT_TIME_SECONDS",
        "LOGIN_PIPELINE_VISIBILITY_TIMEOUT_SECONDS",
        "LOGIN_PIPELINE_OPERATION_TIMEOUT_SECONDS",
        "LOGIN_PIPELINE_MAX_ATTEMPTS",
        "LOGIN_PIPELINE_INITIAL_BACKOFF_MS",
        "LOGIN_PIPELINE_MAX_BACKOFF_MS",
        "LOGIN_PIPELINE_POISON_RECEIVE_THRESHOLD",
        "LOGIN_PIPELINE_POISON_VISIBILITY_TIMEOUT_SECONDS",
        "LOGIN_PIPELINE_DB_MAX_CONNECTIONS",
        "LOGIN_PIPELINE_DB_CONNECTION_TIMEOUT_SECONDS",
        "LOGIN_PIPELINE_DB_STATEMENT_TIMEOUT_SECONDS",
    ];

    fn cleared_env(overrides: &[(&str, &str)]) -> Vec<(&'static str, Option<String>)> {
        SETTINGS_VARS
            .iter()
            .copied()
            .chain(["DATABASE_URL", "AWS_ENDPOINT_URL"])
            .map(|name| {
                let value = overrides
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| (*value).to_owned());
                (name, value)
            })
            .collect()
    }

    fn load_from_empty_args() -> PipelineSettings {
        PipelineSettings::load_from_iter([OsString::from("login-pipeline")])
            .expect("config should load")
    }

    #[rstest]
    fn loads_with_every_variable_cleared() {
        let _guard = lock_env(cleared_env(&[]));

        let loaded = PipelineSettings::load_from_iter([OsString::from("login-pipeline")]);

        assert!(loaded.is_ok(), "settings failed to load: {loaded:?}");
    }

    #[rstest]
    fn defaults_apply_when_nothing_is_set() {
        let _guard = lock_env(cleared_env(&[]));

        let settings = load_from_empty_args();
        let config = settings.pipeline_config();

        assert_eq!(settings.queue_name(), "user-logins-queue");
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.poison_visibility_timeout, MAX_VISIBILITY_TIMEOUT);
        assert_eq!(settings.endpoint_url(), None);
        assert_eq!(settings.statement_timeout(), Duration::from_secs(30));
        assert_eq!(
            settings.queue_config().operation_timeout,
            Duration::from_secs(30)
        );
        assert_eq!(
            settings.database_url(),
            Err(SettingsError::MissingDatabaseUrl)
        );
    }

    #[rstest]
    fn environment_overrides_are_respected() {
        let _guard = lock_env(cleared_env(&[
            ("LOGIN_PIPELINE_QUEUE_NAME", "staging-logins"),
            ("LOGIN_PIPELINE_MAX_MESSAGES", "4"),
            ("LOGIN_PIPELINE_WAIT_TIME_SECONDS", "5"),
            ("LOGIN_PIPELINE_MAX_ATTEMPTS", "6"),
            ("LOGIN_PIPELINE_POISON_RECEIVE_THRESHOLD", "9"),
            ("LOGIN_PIPELINE_DATABASE_URL", "postgres://pipeline@db/logins"),
            ("LOGIN_PIPELINE_DB_MAX_CONNECTIONS", "3"),
        ]));

        let settings = load_from_empty_args();
        let config = settings.pipeline_config();
        let pool = settings.pool_config().expect("database url is set");

        assert_eq!(settings.queue_name(), "staging-logins");
        assert_eq!(config.max_messages, 4);
        assert_eq!(config.wait_time, Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 6);
        assert_eq!(config.poison_receive_threshold, 9);
        assert_eq!(pool.database_url(), "postgres://pipeline@db/logins");
        assert_eq!(pool.max_size(), 3);
    }

    #[rstest]
    fn receive_parameters_are_clamped() {
        let _guard = lock_env(cleared_env(&[
            ("LOGIN_PIPELINE_MAX_MESSAGES", "50"),
            ("LOGIN_PIPELINE_WAIT_TIME_SECONDS", "120"),
        ]));

        let config = load_from_empty_args().pipeline_config();

        assert_eq!(config.max_messages, 10);
        assert_eq!(config.wait_time, Duration::from_secs(20));
    }

    #[rstest]
    #[case("10", Duration::from_secs(25))]
    #[case("60", Duration::from_secs(60))]
    fn operation_timeout_stays_above_the_long_poll(
        #[case] configured: &str,
        #[case] expected: Duration,
    ) {
        let _guard = lock_env(cleared_env(&[(
            "LOGIN_PIPELINE_OPERATION_TIMEOUT_SECONDS",
            configured,
        )]));

        let queue = load_from_empty_args().queue_config();

        assert_eq!(queue.operation_timeout, expected);
    }

    #[rstest]
    fn conventional_variables_are_fallbacks() {
        let _guard = lock_env(cleared_env(&[
            ("DATABASE_URL", "postgres://fallback/logins"),
            ("AWS_ENDPOINT_URL", "http://localhost:4566"),
        ]));

        let settings = load_from_empty_args();
        let pool = settings.pool_config().expect("DATABASE_URL is set");

        assert_eq!(pool.database_url(), "postgres://fallback/logins");
        assert_eq!(
            settings.queue_config().endpoint_url.as_deref(),
            Some("http://localhost:4566")
        );
    }

    #[rstest]
    fn explicit_endpoint_wins_over_fallback() {
        let _guard = lock_env(cleared_env(&[
            ("LOGIN_PIPELINE_ENDPOINT_URL", "http://elasticmq:9324"),
            ("AWS_ENDPOINT_URL", "http://localhost:4566"),
        ]));

        let settings = load_from_empty_args();

        assert_eq!(
            settings.endpoint_url().as_deref(),
            Some("http://elasticmq:9324")
        );
    }

    #[rstest]
    #[case(Some("   "), &[], "database_url")]
    #[case(None, &[("DATABASE_URL", "")], "DATABASE_URL")]
    fn blank_database_url_is_rejected(
        #[case] explicit: Option<&str>,
        #[case] overrides: &[(&str, &str)],
        #[case] source_name: &'static str,
    ) {
        let _guard = lock_env(cleared_env(overrides));
        let mut settings = load_from_empty_args();
        settings.database_url = explicit.map(str::to_owned);

        assert_eq!(
            settings.database_url(),
            Err(SettingsError::EmptyDatabaseUrl { source_name })
        );
        assert!(settings.pool_config().is_err());
    }

    #[rstest]
    fn queue_config_carries_url_and_visibility() {
        let _guard = lock_env(cleared_env(&[]));
        let mut settings = load_from_empty_args();
        settings.queue_url = Some("https://sqs.eu-west-1.amazonaws.com/123/logins".to_owned());
        settings.region = Some("eu-west-1".to_owned());
        settings.visibility_timeout_seconds = Some(45);

        let queue = settings.queue_config();

        assert_eq!(queue.queue_name, "user-logins-queue");
        assert_eq!(
            queue.queue_url.as_deref(),
            Some("https://sqs.eu-west-1.amazonaws.com/123/logins")
        );
        assert_eq!(queue.region.as_deref(), Some("eu-west-1"));
        assert_eq!(queue.visibility_timeout, Some(Duration::from_secs(45)));
    }
}
