//! Error types for queue operations.

use thiserror::Error;

/// Errors that can occur while talking to the queue substrate.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Kafka client error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// The message is not in flight on this queue.
    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    /// The delivery's lease lapsed and the message was handed out again.
    #[error("Lease lost: {0}")]
    LeaseLost(String),

    /// A message identifier that this substrate did not issue.
    #[error("Invalid message id: {0}")]
    InvalidMessageId(String),

    /// Publishing a message failed.
    #[error("Publish error: {0}")]
    Publish(String),

    /// The queue was closed.
    #[error("Queue closed")]
    Closed,
}

impl QueueError {
    /// Create a publish error.
    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }

    /// Whether the same operation may succeed if attempted again later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Kafka(_) | Self::Publish(_))
    }
}
