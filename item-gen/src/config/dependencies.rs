//! Dependency initialization and wiring for the generation stage.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use stac_ingest_queue::{
    KafkaConfig, KafkaPublisher, KafkaQueue, RetryPolicy, Stage, StageWorker, WorkerConfig,
};
use tracing::info;

use crate::executor::{UvxExecutor, DEFAULT_EXECUTION_TIMEOUT, DEFAULT_UVX_PROGRAM};
use crate::generator::{ItemGenerator, DEFAULT_CONCURRENCY};
use crate::relay::Relay;
use crate::ServiceError;

/// Default topic carrying generation requests.
const DEFAULT_GENERATION_TOPIC: &str = "item-gen";

/// Default topic of the load channel.
const DEFAULT_LOAD_TOPIC: &str = "item-load";

/// Default Kafka consumer group ID.
const DEFAULT_GROUP_ID: &str = "item-gen";

/// Settings of the generation stage read from the environment.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub generation_topic: String,
    pub dead_letter_topic: String,
    pub load_topic: String,
    pub group_id: String,
    pub batch_size: usize,
    pub concurrency: usize,
    pub execution_timeout: Duration,
    pub uvx_program: String,
}

impl GenerationSettings {
    /// Read the settings from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ITEM_GEN_TOPIC`: Generation request topic (default: item-gen)
    /// - `ITEM_GEN_DLQ_TOPIC`: Dead-letter topic (default: item-gen-dlq)
    /// - `ITEM_LOAD_TOPIC`: Load channel topic (default: item-load)
    /// - `ITEM_GEN_GROUP_ID`: Consumer group ID (default: item-gen)
    /// - `ITEM_GEN_BATCH_SIZE`: Requests per batch (default: 10)
    /// - `ITEM_GEN_CONCURRENCY`: Concurrent transformations per batch (default: 10)
    /// - `ITEM_GEN_TIMEOUT_SECS`: Transformation time limit (default: 110)
    /// - `UVX_PATH`: Program used to run stactools (default: uvx)
    pub fn from_env() -> Self {
        let defaults = WorkerConfig::for_stage(Stage::Generation);
        let policy = RetryPolicy::for_stage(Stage::Generation);

        Self {
            generation_topic: env::var("ITEM_GEN_TOPIC")
                .unwrap_or_else(|_| DEFAULT_GENERATION_TOPIC.to_string()),
            dead_letter_topic: env::var("ITEM_GEN_DLQ_TOPIC")
                .unwrap_or(policy.dead_letter_channel),
            load_topic: env::var("ITEM_LOAD_TOPIC").unwrap_or_else(|_| DEFAULT_LOAD_TOPIC.to_string()),
            group_id: env::var("ITEM_GEN_GROUP_ID").unwrap_or_else(|_| DEFAULT_GROUP_ID.to_string()),
            batch_size: parse_env("ITEM_GEN_BATCH_SIZE").unwrap_or(defaults.batch_size),
            concurrency: parse_env("ITEM_GEN_CONCURRENCY").unwrap_or(DEFAULT_CONCURRENCY),
            execution_timeout: parse_env("ITEM_GEN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_EXECUTION_TIMEOUT),
            uvx_program: env::var("UVX_PATH").unwrap_or_else(|_| DEFAULT_UVX_PROGRAM.to_string()),
        }
    }

    /// Check the settings against the generation retry policy.
    pub fn validate(&self) -> Result<(), ServiceError> {
        let visibility_timeout = RetryPolicy::for_stage(Stage::Generation).visibility_timeout;
        if self.execution_timeout >= visibility_timeout {
            return Err(ServiceError::config(format!(
                "ITEM_GEN_TIMEOUT_SECS must be below the {}s visibility timeout",
                visibility_timeout.as_secs()
            )));
        }
        if self.batch_size == 0 {
            return Err(ServiceError::config("ITEM_GEN_BATCH_SIZE must be positive"));
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
    /// `KAFKA_PASSWORD` and `KAFKA_SSL_CA_PEM`; see [`GenerationSettings::from_env`]
    /// for the rest.
    pub fn new() -> Result<Self, ServiceError> {
        let settings = GenerationSettings::from_env();
        settings.validate()?;
        let kafka = KafkaConfig::from_env("item-gen");

        info!(
            kafka_broker = %kafka.broker,
            generation_topic = %settings.generation_topic,
            dead_letter_topic = %settings.dead_letter_topic,
            load_topic = %settings.load_topic,
            group_id = %settings.group_id,
            batch_size = settings.batch_size,
            concurrency = settings.concurrency,
            execution_timeout_secs = settings.execution_timeout.as_secs(),
            "Initializing dependencies"
        );

        let policy = RetryPolicy::for_stage(Stage::Generation)
            .with_dead_letter_channel(settings.dead_letter_topic.clone());
        let queue = KafkaQueue::new(&kafka, &settings.generation_topic, &settings.group_id, policy)
            .map_err(|e| ServiceError::config(format!("Failed to create generation queue: {}", e)))?;

        let publisher = KafkaPublisher::new(&kafka, &settings.load_topic)
            .map_err(|e| ServiceError::config(format!("Failed to create load publisher: {}", e)))?;

        info!("Kafka clients created");

        let executor = UvxExecutor::new(&settings.uvx_program, settings.execution_timeout);
        let generator = ItemGenerator::with_concurrency(
            Arc::new(executor),
            Relay::new(Arc::new(publisher)),
            settings.concurrency,
        );

        let config = WorkerConfig {
            batch_size: settings.batch_size,
            ..WorkerConfig::for_stage(Stage::Generation)
        };
        let worker = StageWorker::new(
            Stage::Generation,
            Arc::new(queue),
            Arc::new(generator),
            config,
        );

        Ok(Self { worker })
    }
}
