use async_trait::async_trait;

use crate::errors::QueueError;

/// Publishes payloads onto a channel.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one payload and return the identifier the substrate assigned to it.
    async fn publish(&self, body: &[u8]) -> Result<String, QueueError>;
}
