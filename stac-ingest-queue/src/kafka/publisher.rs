//! Kafka publisher for a single topic.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tracing::debug;

use super::{message_id, KafkaConfig};
use crate::errors::QueueError;
use crate::interfaces::Publisher;

/// How long a send may wait for room in the producer queue.
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes payloads to one Kafka topic and waits for the broker acknowledgment.
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaPublisher {
    pub fn new(config: &KafkaConfig, topic: impl Into<String>) -> Result<Self, QueueError> {
        Ok(Self {
            producer: config.create_producer()?,
            topic: topic.into(),
        })
    }

    /// Get the topic this publisher sends to.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn publish(&self, body: &[u8]) -> Result<String, QueueError> {
        let record: FutureRecord<'_, (), [u8]> = FutureRecord::to(&self.topic).payload(body);
        let (partition, offset) = self
            .producer
            .send(record, ENQUEUE_TIMEOUT)
            .await
            .map_err(|(e, _)| QueueError::Kafka(e))?;

        debug!(topic = %self.topic, partition, offset, "Published message");
        Ok(message_id(&self.topic, partition, offset))
    }
}

impl std::fmt::Debug for KafkaPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaPublisher")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}
