//! In-memory catalog repository.
//!
//! Enforces the same constraints as the PostgreSQL schema: items must reference
//! a known collection and multi-item writes are all-or-nothing. It also counts
//! store accesses and can be switched offline to exercise transient failures.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use stac_ingest_shared::{CatalogItem, ItemKey};
use tokio::sync::RwLock;

use crate::{CatalogRepository, CatalogRepositoryError};

#[derive(Default)]
pub struct InMemoryCatalogRepository {
    collections: RwLock<HashMap<String, Value>>,
    items: RwLock<BTreeMap<ItemKey, CatalogItem>>,
    offline: AtomicBool,
    accesses: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryCatalogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository with the given collections already provisioned.
    pub fn with_collections<I, S>(collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let collections = collections
            .into_iter()
            .map(|id| (id.into(), Value::Object(Default::default())))
            .collect();
        Self {
            collections: RwLock::new(collections),
            ..Self::default()
        }
    }

    /// Make every following call fail with [`CatalogRepositoryError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of calls made against the store, successful or not.
    pub fn accesses(&self) -> u64 {
        self.accesses.load(Ordering::SeqCst)
    }

    /// Number of write transactions committed.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn items(&self) -> Vec<CatalogItem> {
        self.items.read().await.values().cloned().collect()
    }

    fn access(&self) -> Result<(), CatalogRepositoryError> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(CatalogRepositoryError::Unavailable(
                "catalog store is offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogRepository for InMemoryCatalogRepository {
    async fn upsert_item(&self, item: &CatalogItem) -> Result<(), CatalogRepositoryError> {
        self.upsert_items(std::slice::from_ref(item)).await
    }

    async fn upsert_items(&self, items: &[CatalogItem]) -> Result<(), CatalogRepositoryError> {
        if items.is_empty() {
            return Ok(());
        }
        self.access()?;

        let collections = self.collections.read().await;
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            let key = item.key().map_err(|e| {
                CatalogRepositoryError::ConstraintViolation(format!("item {}: {}", item.id, e))
            })?;
            if !collections.contains_key(&key.collection) {
                return Err(CatalogRepositoryError::ConstraintViolation(format!(
                    "item {} references unknown collection {}",
                    key.id, key.collection
                )));
            }
            keyed.push((key, item.clone()));
        }

        let mut stored = self.items.write().await;
        for (key, item) in keyed {
            stored.insert(key, item);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_item(&self, key: &ItemKey) -> Result<Option<CatalogItem>, CatalogRepositoryError> {
        self.access()?;
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn count_items(&self, collection: &str) -> Result<i64, CatalogRepositoryError> {
        self.access()?;
        let count = self
            .items
            .read()
            .await
            .keys()
            .filter(|key| key.collection == collection)
            .count();
        Ok(count as i64)
    }

    async fn upsert_collection(
        &self,
        collection_id: &str,
        content: &Value,
    ) -> Result<(), CatalogRepositoryError> {
        self.access()?;
        self.collections
            .write()
            .await
            .insert(collection_id.to_string(), content.clone());
        Ok(())
    }

    async fn check_tables_created(&self) -> Result<bool, CatalogRepositoryError> {
        self.access()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use stac_ingest_shared::{Geometry, ItemProperties};

    fn item(collection: &str, id: &str) -> CatalogItem {
        CatalogItem::new(
            id,
            collection,
            Geometry::Point {
                coordinates: vec![-85.0, 45.0],
            },
            ItemProperties::at(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()),
        )
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_item() {
        let repository = InMemoryCatalogRepository::with_collections(["g"]);
        let mut second = item("g", "asset");
        second.properties.extra.insert("version".into(), Value::from(2));

        repository.upsert_item(&item("g", "asset")).await.unwrap();
        repository.upsert_item(&second).await.unwrap();

        assert_eq!(repository.count_items("g").await.unwrap(), 1);
        let stored = repository
            .get_item(&ItemKey::new("g", "asset"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.properties.extra["version"], Value::from(2));
    }

    #[tokio::test]
    async fn test_unknown_collection_rolls_back_whole_write() {
        let repository = InMemoryCatalogRepository::with_collections(["g"]);

        let err = repository
            .upsert_items(&[item("g", "a"), item("missing", "b")])
            .await
            .unwrap_err();

        assert!(err.is_constraint_violation());
        assert_eq!(repository.count_items("g").await.unwrap(), 0);
        assert_eq!(repository.writes(), 0);
    }

    #[tokio::test]
    async fn test_offline_store_is_transient() {
        let repository = InMemoryCatalogRepository::with_collections(["g"]);
        repository.set_offline(true);

        let err = repository.upsert_item(&item("g", "a")).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(repository.accesses(), 1);
    }

    #[tokio::test]
    async fn test_empty_write_does_not_touch_store() {
        let repository = InMemoryCatalogRepository::new();
        repository.upsert_items(&[]).await.unwrap();
        assert_eq!(repository.accesses(), 0);
    }
}
