//! This module defines the `CatalogRepository` trait, the interface the load stage
//! uses to persist catalog items keyed by `(collection, id)`.
use serde_json::Value;
use stac_ingest_shared::{CatalogItem, ItemKey};

use crate::errors::CatalogRepositoryError;

/// A trait that defines the interface for interacting with the catalog store.
///
/// Every write is an upsert on the natural key: an absent item is inserted, a
/// present one is replaced entirely. Items must reference an existing collection.
#[async_trait::async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Upserts one item in its own transaction.
    async fn upsert_item(&self, item: &CatalogItem) -> Result<(), CatalogRepositoryError>;

    /// Upserts a slice of items in a single transaction.
    ///
    /// Either every item is written or none is. Keys must be unique within the
    /// slice. Empty slices are no-ops.
    async fn upsert_items(&self, items: &[CatalogItem]) -> Result<(), CatalogRepositoryError>;

    /// Fetches the stored item for a key.
    async fn get_item(&self, key: &ItemKey) -> Result<Option<CatalogItem>, CatalogRepositoryError>;

    /// Counts the items stored in a collection.
    async fn count_items(&self, collection: &str) -> Result<i64, CatalogRepositoryError>;

    /// Creates or replaces a collection. Collections are provisioned outside the
    /// ingest stages; this is for administration and seeding.
    async fn upsert_collection(
        &self,
        collection_id: &str,
        content: &Value,
    ) -> Result<(), CatalogRepositoryError>;

    /// Checks that the catalog tables exist.
    async fn check_tables_created(&self) -> Result<bool, CatalogRepositoryError>;
}
