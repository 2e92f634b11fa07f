use async_trait::async_trait;

use crate::message::{BatchResponse, QueueMessage};

/// Stage logic applied to one received batch.
///
/// Handlers never fail as a whole: every problem is reported per message in the
/// returned [`BatchResponse`].
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, batch: &[QueueMessage]) -> BatchResponse;
}
