//! Kafka-backed stage queue and publisher.
//!
//! Kafka has no per-message lease, so the queue keeps the redelivery contract with
//! offsets and headers instead:
//!
//! - the receive count travels in the [`RECEIVE_COUNT_HEADER`] header
//! - a released message is republished to the stage topic with its count, or to
//!   the dead-letter topic once another delivery would exceed the limit
//! - offsets are committed manually up to the lowest unsettled message, so anything
//!   not settled before a restart or rebalance is consumed again

mod config;
mod publisher;
mod queue;

pub use config::KafkaConfig;
pub use publisher::KafkaPublisher;
pub use queue::KafkaQueue;

/// Header carrying the number of deliveries a payload has already had.
pub const RECEIVE_COUNT_HEADER: &str = "x-receive-count";

/// Identifier of a Kafka record, `topic:partition:offset`.
pub(crate) fn message_id(topic: &str, partition: i32, offset: i64) -> String {
    format!("{topic}:{partition}:{offset}")
}

/// Split a `topic:partition:offset` identifier. Topic names cannot contain `:`.
pub(crate) fn parse_message_id(message_id: &str) -> Option<(&str, i32, i64)> {
    let mut parts = message_id.rsplitn(3, ':');
    let offset = parts.next()?.parse().ok()?;
    let partition = parts.next()?.parse().ok()?;
    let topic = parts.next()?;
    if topic.is_empty() {
        return None;
    }
    Some((topic, partition, offset))
}
