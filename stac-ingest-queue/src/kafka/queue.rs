//! Kafka-backed stage queue.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use super::{message_id, parse_message_id, KafkaConfig, RECEIVE_COUNT_HEADER};
use crate::errors::QueueError;
use crate::interfaces::MessageQueue;
use crate::message::QueueMessage;
use crate::policy::{DeliveryEvent, DeliveryState, RetryPolicy};

/// How long a send may wait for room in the producer queue.
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// A received record that has not been settled yet.
#[derive(Debug)]
struct Lease {
    partition: i32,
    offset: i64,
    body: Vec<u8>,
    receive_count: u32,
}

/// Offsets of one partition, used to compute the commit watermark.
#[derive(Debug, Default)]
struct PartitionOffsets {
    unsettled: BTreeSet<i64>,
    highest_settled: Option<i64>,
    committed: Option<i64>,
}

impl PartitionOffsets {
    /// Next offset to commit: the lowest unsettled record, or past the highest
    /// settled one when nothing is outstanding.
    fn watermark(&self) -> Option<i64> {
        match self.unsettled.first() {
            Some(lowest) => Some(*lowest),
            None => self.highest_settled.map(|offset| offset + 1),
        }
    }
}

#[derive(Debug, Default)]
struct LeaseState {
    leases: HashMap<String, Lease>,
    partitions: HashMap<i32, PartitionOffsets>,
}

impl LeaseState {
    /// Remove the lease `message` was delivered under.
    ///
    /// A delivery whose receive count differs from the lease's belongs to an
    /// earlier read of the same record and leaves the lease in place.
    fn take(&mut self, message: &QueueMessage) -> Result<Lease, QueueError> {
        let message_id = message.message_id.as_str();
        match self.leases.get(message_id) {
            None => Err(QueueError::UnknownMessage(message_id.to_string())),
            Some(lease) if lease.receive_count != message.receive_count => {
                Err(QueueError::LeaseLost(message_id.to_string()))
            }
            Some(_) => self
                .leases
                .remove(message_id)
                .ok_or_else(|| QueueError::UnknownMessage(message_id.to_string())),
        }
    }
}

/// Stage queue on a Kafka topic.
///
/// A consumer in the stage's group reads the topic; a producer handles the
/// republishing of failed payloads and the dead-letter topic.
pub struct KafkaQueue {
    consumer: StreamConsumer,
    producer: FutureProducer,
    topic: String,
    policy: RetryPolicy,
    state: Mutex<LeaseState>,
}

impl KafkaQueue {
    /// Create a queue reading `topic` as part of `group_id` and subscribe to it.
    ///
    /// The policy's dead-letter channel is used as the dead-letter topic.
    pub fn new(
        config: &KafkaConfig,
        topic: impl Into<String>,
        group_id: &str,
        policy: RetryPolicy,
    ) -> Result<Self, QueueError> {
        let topic = topic.into();
        let consumer = config.create_consumer(group_id)?;
        consumer.subscribe(&[topic.as_str()])?;

        info!(
            broker = %config.broker,
            topic = %topic,
            group_id = %group_id,
            dead_letter_topic = %policy.dead_letter_channel,
            "Subscribed stage queue"
        );

        Ok(Self {
            consumer,
            producer: config.create_producer()?,
            topic,
            policy,
            state: Mutex::new(LeaseState::default()),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    async fn send(&self, topic: &str, body: &[u8], receive_count: u32) -> Result<(), QueueError> {
        let count = receive_count.to_string();
        let headers = OwnedHeaders::new().insert(Header {
            key: RECEIVE_COUNT_HEADER,
            value: Some(count.as_str()),
        });
        let record: FutureRecord<'_, (), [u8]> =
            FutureRecord::to(topic).payload(body).headers(headers);

        self.producer
            .send(record, ENQUEUE_TIMEOUT)
            .await
            .map_err(|(e, _)| QueueError::Kafka(e))?;
        Ok(())
    }

    /// Mark a record as settled and commit the partition watermark if it moved.
    async fn settle_offset(&self, partition: i32, offset: i64) -> Result<(), QueueError> {
        let commit = {
            let mut state = self.state.lock().await;
            let offsets = state.partitions.entry(partition).or_default();
            offsets.unsettled.remove(&offset);
            offsets.highest_settled = Some(offsets.highest_settled.map_or(offset, |o| o.max(offset)));

            match offsets.watermark() {
                Some(watermark) if offsets.committed.map_or(true, |c| watermark > c) => {
                    offsets.committed = Some(watermark);
                    Some(watermark)
                }
                _ => None,
            }
        };

        if let Some(watermark) = commit {
            let mut tpl = TopicPartitionList::new();
            tpl.add_partition_offset(&self.topic, partition, Offset::Offset(watermark))?;
            self.consumer.commit(&tpl, CommitMode::Async)?;
            debug!(topic = %self.topic, partition, offset = watermark, "Committed offset");
        }
        Ok(())
    }

    async fn take_lease(&self, message: &QueueMessage) -> Result<Lease, QueueError> {
        let message_id = message.message_id.as_str();
        let (topic, _, _) = parse_message_id(message_id)
            .ok_or_else(|| QueueError::InvalidMessageId(message_id.to_string()))?;
        if topic != self.topic {
            return Err(QueueError::InvalidMessageId(message_id.to_string()));
        }

        self.state.lock().await.take(message)
    }

    async fn restore_lease(&self, message_id: &str, lease: Lease) {
        self.state
            .lock()
            .await
            .leases
            .insert(message_id.to_string(), lease);
    }
}

fn receive_count_header(message: &impl Message) -> u32 {
    message
        .headers()
        .and_then(|headers| {
            headers
                .iter()
                .find(|header| header.key == RECEIVE_COUNT_HEADER)
                .and_then(|header| header.value)
                .and_then(|value| std::str::from_utf8(value).ok())
                .and_then(|value| value.parse().ok())
        })
        .unwrap_or(0)
}

#[async_trait]
impl MessageQueue for KafkaQueue {
    fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Collects records until `max_messages` arrived or `wait` elapsed.
    ///
    /// The receive count travels in the record header and only grows when a
    /// release republishes the record. A record read but never settled, because the
    /// worker crashed or the partition was reassigned, is read again from the
    /// committed offset with its old header. Such deliveries do not count toward the
    /// receive limit, so a message that crashes the worker is never dead-lettered.
    #[instrument(skip(self), fields(topic = %self.topic))]
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let deadline = Instant::now() + wait;
        let mut batch = Vec::new();

        while batch.len() < max_messages {
            let (partition, offset, id, body, delivered) =
                match timeout_at(deadline, self.consumer.recv()).await {
                    Err(_) => break,
                    Ok(result) => {
                        let message = result?;
                        (
                            message.partition(),
                            message.offset(),
                            message_id(message.topic(), message.partition(), message.offset()),
                            message.payload().unwrap_or_default().to_vec(),
                            receive_count_header(&message),
                        )
                    }
                };

            self.state
                .lock()
                .await
                .partitions
                .entry(partition)
                .or_default()
                .unsettled
                .insert(offset);

            match self
                .policy
                .transition(DeliveryState::Enqueued, DeliveryEvent::Receive, delivered)
            {
                Some(DeliveryState::DeadLettered) => {
                    warn!(
                        message_id = %id,
                        receive_count = delivered,
                        channel = %self.policy.dead_letter_channel,
                        "Moving message to dead-letter channel"
                    );
                    self.send(&self.policy.dead_letter_channel, &body, delivered)
                        .await?;
                    self.settle_offset(partition, offset).await?;
                }
                _ => {
                    let receive_count = delivered.saturating_add(1);
                    debug!(message_id = %id, receive_count, "Received message");
                    self.state.lock().await.leases.insert(
                        id.clone(),
                        Lease {
                            partition,
                            offset,
                            body: body.clone(),
                            receive_count,
                        },
                    );
                    batch.push(QueueMessage::new(id, body, receive_count));
                }
            }
        }

        Ok(batch)
    }

    async fn acknowledge(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let lease = self.take_lease(message).await?;
        self.settle_offset(lease.partition, lease.offset).await
    }

    /// Republishes the payload for another delivery, or to the dead-letter topic
    /// when the receive limit is reached. The lease is kept if republishing fails.
    async fn release(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let message_id = message.message_id.as_str();
        let lease = self.take_lease(message).await?;

        let target = if self.policy.admits(lease.receive_count.saturating_add(1)) {
            self.topic.as_str()
        } else {
            warn!(
                message_id = %message_id,
                receive_count = lease.receive_count,
                channel = %self.policy.dead_letter_channel,
                "Moving message to dead-letter channel"
            );
            self.policy.dead_letter_channel.as_str()
        };

        if let Err(e) = self.send(target, &lease.body, lease.receive_count).await {
            self.restore_lease(message_id, lease).await;
            return Err(e);
        }
        self.settle_offset(lease.partition, lease.offset).await
    }
}

impl std::fmt::Debug for KafkaQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaQueue")
            .field("topic", &self.topic)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
