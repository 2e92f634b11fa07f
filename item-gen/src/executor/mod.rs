//! Generation executors.
//!
//! A [`GenerationExecutor`] turns one [`GenerationRequest`] into one
//! [`CatalogItem`]. The production implementation runs a stactools package
//! through `uvx`; tests substitute their own.

mod uvx;

pub use uvx::{UvxExecutor, DEFAULT_EXECUTION_TIMEOUT, DEFAULT_UVX_PROGRAM};

use async_trait::async_trait;
use serde_json::Value;
use stac_ingest_shared::{CatalogItem, GenerationRequest};

use crate::errors::GenerationError;

/// Runs the external transformation for one request.
#[async_trait]
pub trait GenerationExecutor: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<CatalogItem, GenerationError>;
}

/// Turn a produced item document into a catalog item, applying the request's
/// collection override first.
///
/// A document that is not a valid item is a transformation failure.
pub fn finalize_item(
    mut document: Value,
    request: &GenerationRequest,
) -> Result<CatalogItem, GenerationError> {
    if let Some(collection_id) = &request.collection_id {
        match document.as_object_mut() {
            Some(object) => {
                object.insert("collection".to_string(), Value::from(collection_id.as_str()));
            }
            None => {
                return Err(GenerationError::transformation(
                    "transformation output is not a JSON object",
                ))
            }
        }
    }

    CatalogItem::from_value(document).map_err(|e| {
        GenerationError::transformation(format!("transformation produced an invalid item: {e}"))
    })
}
