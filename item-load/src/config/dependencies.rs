//! Dependency initialization and wiring for the load stage.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use stac_ingest_queue::{KafkaConfig, KafkaQueue, RetryPolicy, Stage, StageWorker, WorkerConfig};
use stac_ingest_repository::{CatalogRepository, PoolConfig, PostgresCatalogRepository};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::loader::BatchLoader;
use crate::ServiceError;

/// Default topic of the load channel.
const DEFAULT_LOAD_TOPIC: &str = "item-load";

/// Default Kafka consumer group ID.
const DEFAULT_GROUP_ID: &str = "item-load";

/// Default connection retry interval in seconds.
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 15;

/// Connection mode for the catalog store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Fail immediately if connection fails.
    FailFast,
    /// Retry the connection at a fixed interval until it succeeds.
    Retry,
}

impl ConnectionMode {
    /// Parse a connection mode.
    ///
    /// Valid values: "fail-fast" or "retry" (case-insensitive).
    /// Unknown values fall back to "retry".
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "fail-fast" | "failfast" | "fail_fast" => Self::FailFast,
            "retry" => Self::Retry,
            _ => {
                warn!(value, "Invalid DATABASE_CONNECTION_MODE, defaulting to 'retry'");
                Self::Retry
            }
        }
    }

    fn from_env() -> Self {
        env::var("DATABASE_CONNECTION_MODE")
            .map(|value| Self::parse(&value))
            .unwrap_or(Self::Retry)
    }
}

/// Settings of the load stage read from the environment.
#[derive(Debug, Clone)]
pub struct LoadSettings {
    pub load_topic: String,
    pub dead_letter_topic: String,
    pub group_id: String,
    pub batch_size: usize,
    pub batch_window: Duration,
    pub pool: PoolConfig,
    pub connection_mode: ConnectionMode,
    pub retry_interval: Duration,
}

impl LoadSettings {
    /// Read the settings from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DATABASE_URL`: Catalog store connection string (required)
    /// - `DATABASE_MAX_CONNECTIONS`: Pool size (default: 10)
    /// - `DATABASE_STATEMENT_TIMEOUT_SECS`: Per-statement limit (default: 30)
    /// - `DATABASE_CONNECTION_MODE`: "fail-fast" or "retry" (default: retry)
    /// - `DATABASE_RETRY_INTERVAL_SECS`: Retry interval in seconds (default: 15)
    /// - `ITEM_LOAD_TOPIC`: Load channel topic (default: item-load)
    /// - `ITEM_LOAD_DLQ_TOPIC`: Dead-letter topic (default: item-load-dlq)
    /// - `ITEM_LOAD_GROUP_ID`: Consumer group ID (default: item-load)
    /// - `ITEM_LOAD_BATCH_SIZE`: Maximum messages per batch (default: 1000)
    /// - `ITEM_LOAD_BATCH_WINDOW_SECS`: Maximum wait to fill a batch (default: 60)
    pub fn from_env() -> Result<Self, ServiceError> {
        let url = env::var("DATABASE_URL")
            .map_err(|_| ServiceError::config("DATABASE_URL must be set"))?;
        let defaults = WorkerConfig::for_stage(Stage::Load);
        let policy = RetryPolicy::for_stage(Stage::Load);

        let mut pool = PoolConfig::new(url);
        if let Some(max_connections) = parse_env("DATABASE_MAX_CONNECTIONS") {
            pool.max_connections = max_connections;
        }
        if let Some(secs) = parse_env("DATABASE_STATEMENT_TIMEOUT_SECS") {
            pool.statement_timeout = Duration::from_secs(secs);
        }

        Ok(Self {
            load_topic: env::var("ITEM_LOAD_TOPIC").unwrap_or_else(|_| DEFAULT_LOAD_TOPIC.to_string()),
            dead_letter_topic: env::var("ITEM_LOAD_DLQ_TOPIC")
                .unwrap_or(policy.dead_letter_channel),
            group_id: env::var("ITEM_LOAD_GROUP_ID").unwrap_or_else(|_| DEFAULT_GROUP_ID.to_string()),
            batch_size: parse_env("ITEM_LOAD_BATCH_SIZE").unwrap_or(defaults.batch_size),
            batch_window: parse_env("ITEM_LOAD_BATCH_WINDOW_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.batch_window),
            pool,
            connection_mode: ConnectionMode::from_env(),
            retry_interval: Duration::from_secs(
                parse_env("DATABASE_RETRY_INTERVAL_SECS").unwrap_or(DEFAULT_RETRY_INTERVAL_SECS),
            ),
        })
    }

    /// Check the settings against the load retry policy.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.batch_size == 0 {
            return Err(ServiceError::config("ITEM_LOAD_BATCH_SIZE must be positive"));
        }
        let visibility_timeout = RetryPolicy::for_stage(Stage::Load).visibility_timeout;
        if self.pool.statement_timeout >= visibility_timeout {
            return Err(ServiceError::config(format!(
                "DATABASE_STATEMENT_TIMEOUT_SECS must be below the {}s visibility timeout",
                visibility_timeout.as_secs()
            )));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.parse().ok())
}

/// Container for all initialized dependencies.
pub struct Dependencies {
    /// The configured worker ready to run.
    pub worker: StageWorker,
}

impl Dependencies {
    /// Initialize all dependencies from environment variables.
    ///
    /// Kafka connection settings come from `KAFKA_BROKER`, `KAFKA_USERNAME`,
    /// `KAFKA_PASSWORD` and `KAFKA_SSL_CA_PEM`; see [`LoadSettings::from_env`]
    /// for the rest.
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(ServiceError)` - If initialization fails (only in fail-fast mode
    ///   for store connection errors)
    pub async fn new() -> Result<Self, ServiceError> {
        let settings = LoadSettings::from_env()?;
        settings.validate()?;
        let kafka = KafkaConfig::from_env("item-load");

        info!(
            kafka_broker = %kafka.broker,
            load_topic = %settings.load_topic,
            dead_letter_topic = %settings.dead_letter_topic,
            group_id = %settings.group_id,
            batch_size = settings.batch_size,
            batch_window_secs = settings.batch_window.as_secs(),
            max_connections = settings.pool.max_connections,
            connection_mode = ?settings.connection_mode,
            retry_interval_secs = settings.retry_interval.as_secs(),
            "Initializing dependencies"
        );

        let repository = Self::connect_to_store(
            &settings.pool,
            settings.connection_mode,
            settings.retry_interval,
        )
        .await?;

        info!("Catalog store connection established");

        repository.migrate().await?;
        if !repository.check_tables_created().await? {
            return Err(ServiceError::config("Catalog tables are missing after migration"));
        }

        let policy = RetryPolicy::for_stage(Stage::Load)
            .with_dead_letter_channel(settings.dead_letter_topic.clone());
        let queue = KafkaQueue::new(&kafka, &settings.load_topic, &settings.group_id, policy)
            .map_err(|e| ServiceError::config(format!("Failed to create load queue: {}", e)))?;

        info!("Kafka consumer created");

        let loader = BatchLoader::new(Arc::new(repository));

        let config = WorkerConfig {
            batch_size: settings.batch_size,
            batch_window: settings.batch_window,
            ..WorkerConfig::for_stage(Stage::Load)
        };
        let worker = StageWorker::new(Stage::Load, Arc::new(queue), Arc::new(loader), config);

        Ok(Self { worker })
    }

    /// Connect to the catalog store with retry logic based on connection mode.
    async fn connect_to_store(
        pool: &PoolConfig,
        mode: ConnectionMode,
        retry_interval: Duration,
    ) -> Result<PostgresCatalogRepository, ServiceError> {
        loop {
            match PostgresCatalogRepository::connect(pool).await {
                Ok(repository) => return Ok(repository),
                Err(e) => match mode {
                    ConnectionMode::FailFast => {
                        return Err(ServiceError::config(format!(
                            "Failed to connect to the catalog store: {}",
                            e
                        )));
                    }
                    ConnectionMode::Retry => {
                        warn!(
                            error = %e,
                            retry_interval_secs = retry_interval.as_secs(),
                            "Failed to connect to the catalog store, retrying..."
                        );
                        sleep(retry_interval).await;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> LoadSettings {
        LoadSettings {
            load_topic: DEFAULT_LOAD_TOPIC.to_string(),
            dead_letter_topic: "item-load-dlq".to_string(),
            group_id: DEFAULT_GROUP_ID.to_string(),
            batch_size: 1000,
            batch_window: Duration::from_secs(60),
            pool: PoolConfig::new("postgres://localhost/catalog"),
            connection_mode: ConnectionMode::Retry,
            retry_interval: Duration::from_secs(DEFAULT_RETRY_INTERVAL_SECS),
        }
    }

    #[test]
    fn test_default_settings_are_valid() {
        settings().validate().unwrap();
    }

    #[test]
    fn test_statement_timeout_must_fit_visibility_window() {
        let mut settings = settings();
        settings.pool.statement_timeout = Duration::from_secs(60);
        assert!(matches!(
            settings.validate(),
            Err(ServiceError::ConfigError(_))
        ));
    }

    #[test]
    fn test_connection_mode_parsing() {
        assert_eq!(ConnectionMode::parse("fail-fast"), ConnectionMode::FailFast);
        assert_eq!(ConnectionMode::parse("FAIL_FAST"), ConnectionMode::FailFast);
        assert_eq!(ConnectionMode::parse("retry"), ConnectionMode::Retry);
        assert_eq!(ConnectionMode::parse("sometimes"), ConnectionMode::Retry);
    }
}
