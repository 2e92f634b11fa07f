//! Kafka client configuration.

use std::env;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::StreamConsumer;
use rdkafka::producer::FutureProducer;

use crate::errors::QueueError;

/// Default broker when `KAFKA_BROKER` is unset.
pub const DEFAULT_BROKER: &str = "localhost:9092";

/// Connection settings shared by the stage consumers and producers.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Kafka broker address (e.g., "localhost:9092")
    pub broker: String,
    /// Client ID reported to the broker
    pub client_id: String,
    /// SASL username (enables SASL/SSL if set)
    pub username: Option<String>,
    /// SASL password (required if username is set)
    pub password: Option<String>,
    /// Custom CA certificate in PEM format
    pub ssl_ca_pem: Option<String>,
}

impl KafkaConfig {
    pub fn new(broker: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            client_id: client_id.into(),
            username: None,
            password: None,
            ssl_ca_pem: None,
        }
    }

    /// Read the configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `KAFKA_BROKER` - Broker address (defaults to `localhost:9092`)
    /// - `KAFKA_USERNAME` - SASL username (optional)
    /// - `KAFKA_PASSWORD` - SASL password (optional)
    /// - `KAFKA_SSL_CA_PEM` - Custom CA cert in PEM format (optional)
    pub fn from_env(client_id: impl Into<String>) -> Self {
        Self {
            broker: env::var("KAFKA_BROKER").unwrap_or_else(|_| DEFAULT_BROKER.to_string()),
            client_id: client_id.into(),
            username: env::var("KAFKA_USERNAME").ok(),
            password: env::var("KAFKA_PASSWORD").ok(),
            ssl_ca_pem: env::var("KAFKA_SSL_CA_PEM").ok(),
        }
    }

    /// Set SASL credentials.
    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }

    /// Base client configuration with authentication applied.
    pub fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.broker)
            .set("client.id", &self.client_id);

        // SASL/SSL for managed clusters, plaintext for local development
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            client_config
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);

            if let Some(ca_pem) = &self.ssl_ca_pem {
                client_config.set("ssl.ca.pem", ca_pem);
            }
        }

        client_config
    }

    /// Create a producer with zstd compression.
    pub fn create_producer(&self) -> Result<FutureProducer, QueueError> {
        let producer = self
            .client_config()
            .set("compression.type", "zstd")
            .set("message.timeout.ms", "5000")
            .set("queue.buffering.max.messages", "100000")
            .create()?;
        Ok(producer)
    }

    /// Create a consumer in `group_id` with manual offset commits.
    pub fn create_consumer(&self, group_id: &str) -> Result<StreamConsumer, QueueError> {
        let consumer = self
            .client_config()
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .create()?;
        Ok(consumer)
    }
}
