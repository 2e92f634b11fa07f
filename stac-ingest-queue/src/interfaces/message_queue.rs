use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::errors::QueueError;
use crate::message::{BatchResponse, QueueMessage};
use crate::policy::RetryPolicy;

/// A stage queue with at-least-once delivery.
///
/// Received messages are leased to the caller until they are acknowledged, released
/// or their visibility window lapses. Redelivery and dead-lettering follow
/// [`MessageQueue::policy`].
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Redelivery parameters this queue applies.
    fn policy(&self) -> &RetryPolicy;

    /// Receive up to `max_messages` messages, waiting at most `wait` for the first one.
    ///
    /// Returns an empty batch when nothing arrived in time.
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Remove a leased message from the queue.
    ///
    /// `message` must be the delivery the caller received. Once its lease lapsed
    /// and the message was delivered again, the old delivery is rejected with
    /// [`QueueError::LeaseLost`].
    async fn acknowledge(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Report a leased message as failed so it is redelivered (or dead-lettered).
    ///
    /// Same lease rules as [`MessageQueue::acknowledge`].
    async fn release(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Apply a partial batch response: release every message it names and
    /// acknowledge the rest of the batch.
    ///
    /// Every message is settled even when some of them fail; the first error is
    /// returned afterwards.
    async fn settle(
        &self,
        batch: &[QueueMessage],
        response: &BatchResponse,
    ) -> Result<(), QueueError> {
        let failed = response.failed_ids();
        let mut first_error = None;
        let mut errors = 0;

        for message in batch {
            let result = if failed.contains(message.message_id.as_str()) {
                warn!(
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    "Releasing failed message"
                );
                self.release(message).await
            } else {
                self.acknowledge(message).await
            };

            if let Err(e) = result {
                warn!(message_id = %message.message_id, error = %e, "Failed to settle message");
                errors += 1;
                first_error.get_or_insert(e);
            }
        }

        debug!(
            batch_size = batch.len(),
            failed = failed.len(),
            errors,
            "Settled batch"
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
