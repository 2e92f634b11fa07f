//! Relay from the generation stage to the load channel.

use std::sync::Arc;

use stac_ingest_queue::Publisher;
use stac_ingest_shared::CatalogItem;
use tracing::{debug, instrument};

use crate::errors::GenerationError;

/// Publishes generated items onto the load channel.
///
/// Each call publishes exactly once; a failed publish is returned to the caller
/// and fails the generation attempt.
#[derive(Clone)]
pub struct Relay {
    publisher: Arc<dyn Publisher>,
}

impl Relay {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }

    /// Publish `item` and return the load channel's message id.
    #[instrument(skip(self, item), fields(item_id = %item.id))]
    pub async fn publish(&self, item: &CatalogItem) -> Result<String, GenerationError> {
        let body = serde_json::to_vec(item).map_err(|e| {
            GenerationError::infrastructure(format!("failed to serialize item: {e}"))
        })?;
        let message_id = self.publisher.publish(&body).await?;
        debug!(message_id = %message_id, "Relayed item to load channel");
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stac_ingest_queue::QueueError;
    use stac_ingest_shared::{Geometry, ItemProperties};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<Vec<u8>>>,
        fail: bool,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, body: &[u8]) -> Result<String, QueueError> {
            if self.fail {
                return Err(QueueError::publish("broker unavailable"));
            }
            let mut published = self.published.lock().unwrap();
            published.push(body.to_vec());
            Ok(format!("m-{}", published.len()))
        }
    }

    fn item() -> CatalogItem {
        CatalogItem::new(
            "asset",
            "g",
            Geometry::Point {
                coordinates: vec![-85.0, 45.0],
            },
            ItemProperties::at("2021-01-01T00:00:00Z".parse().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_publish_once() {
        let publisher = Arc::new(RecordingPublisher::default());
        let relay = Relay::new(publisher.clone());

        assert_eq!(relay.publish(&item()).await.unwrap(), "m-1");

        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(CatalogItem::from_json(&published[0]).unwrap(), item());
    }

    #[tokio::test]
    async fn test_publish_failure_is_relay_failure() {
        let publisher = Arc::new(RecordingPublisher {
            fail: true,
            ..Default::default()
        });
        let relay = Relay::new(publisher);

        let err = relay.publish(&item()).await.unwrap_err();
        assert!(matches!(err, GenerationError::RelayFailure(_)));
    }
}
