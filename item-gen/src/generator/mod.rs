//! Generation batch handler.
//!
//! For every message of a batch: decode the request, run the transformation and
//! relay the produced item. A message is acknowledged only after its item was
//! published; every failure, whatever its class, fails that message alone.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use stac_ingest_queue::{BatchHandler, BatchResponse, QueueMessage};
use stac_ingest_shared::GenerationRequest;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::GenerationError;
use crate::executor::GenerationExecutor;
use crate::relay::Relay;

/// Default number of transformations running at once within a batch.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Batch handler of the generation stage.
pub struct ItemGenerator {
    executor: Arc<dyn GenerationExecutor>,
    relay: Relay,
    concurrency: usize,
}

impl ItemGenerator {
    pub fn new(executor: Arc<dyn GenerationExecutor>, relay: Relay) -> Self {
        Self::with_concurrency(executor, relay, DEFAULT_CONCURRENCY)
    }

    pub fn with_concurrency(
        executor: Arc<dyn GenerationExecutor>,
        relay: Relay,
        concurrency: usize,
    ) -> Self {
        Self {
            executor,
            relay,
            concurrency: concurrency.max(1),
        }
    }

    /// Generate and relay the item for one message.
    ///
    /// Returns the load channel message id of the relayed item.
    #[instrument(skip(self, message), fields(message_id = %message.message_id, receive_count = message.receive_count))]
    pub async fn process(&self, message: &QueueMessage) -> Result<String, GenerationError> {
        debug!(body = %String::from_utf8_lossy(&message.body), "Generation request");

        let request = GenerationRequest::from_json(&message.body)?;
        let item = self.executor.generate(&request).await?;
        let relayed = self.relay.publish(&item).await?;

        info!(
            item_id = %item.id,
            collection = item.collection.as_deref().unwrap_or_default(),
            relayed_message_id = %relayed,
            "Generated item"
        );
        Ok(relayed)
    }
}

#[async_trait]
impl BatchHandler for ItemGenerator {
    async fn handle(&self, batch: &[QueueMessage]) -> BatchResponse {
        let outcomes: Vec<(&QueueMessage, Result<String, GenerationError>)> =
            stream::iter(
                batch
                    .iter()
                    .map(|message| async move { (message, self.process(message).await) })
                    .collect::<Vec<_>>(),
            )
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let mut response = BatchResponse::success();
        for (message, outcome) in outcomes {
            if let Err(e) = outcome {
                error!(
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    error_kind = e.kind(),
                    transient = e.is_transient(),
                    error = %e,
                    "Generation failed"
                );
                response.fail(message.message_id.clone());
            }
        }

        if response.is_success() {
            info!(batch_size = batch.len(), "Generated batch");
        } else {
            warn!(
                batch_size = batch.len(),
                failed = response.failure_count(),
                "Generated batch with failures"
            );
        }
        response
    }
}
