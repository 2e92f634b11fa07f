//! Batch loader of the load stage.
//!
//! A batch is decoded message by message, grouped by collection and written with
//! one bulk upsert per collection chunk. When a bulk statement fails for a reason
//! that belongs to its rows, the chunk is replayed one item per transaction so that
//! only the offending messages fail.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use stac_ingest_queue::{BatchHandler, BatchResponse, QueueMessage};
use stac_ingest_repository::CatalogRepository;
use stac_ingest_shared::CatalogItem;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::LoadError;
use crate::loader::decode::decode_message;
use crate::loader::report::LoadReport;

/// Maximum number of items written by one bulk statement.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Configuration for the batch loader.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Number of items per bulk upsert.
    pub chunk_size: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Items of one collection waiting to be written, deduplicated by id.
///
/// `items[i]` is the last arrival of its id and `message_ids[i]` every message
/// that carried that id.
#[derive(Default)]
struct CollectionGroup {
    items: Vec<CatalogItem>,
    message_ids: Vec<Vec<String>>,
    positions: HashMap<String, usize>,
}

impl CollectionGroup {
    fn push(&mut self, message_id: &str, item: CatalogItem) {
        match self.positions.get(&item.id) {
            Some(&index) => {
                self.items[index] = item;
                self.message_ids[index].push(message_id.to_string());
            }
            None => {
                self.positions.insert(item.id.clone(), self.items.len());
                self.items.push(item);
                self.message_ids.push(vec![message_id.to_string()]);
            }
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Loads batches of catalog items into the catalog store.
pub struct BatchLoader {
    repository: Arc<dyn CatalogRepository>,
    config: LoaderConfig,
}

impl BatchLoader {
    /// Create a new batch loader with the default configuration.
    pub fn new(repository: Arc<dyn CatalogRepository>) -> Self {
        Self::with_config(repository, LoaderConfig::default())
    }

    /// Create a new batch loader with custom configuration.
    pub fn with_config(repository: Arc<dyn CatalogRepository>, config: LoaderConfig) -> Self {
        Self {
            repository,
            config: LoaderConfig {
                chunk_size: config.chunk_size.max(1),
            },
        }
    }

    /// Load one batch and report the outcome of every message.
    ///
    /// An empty batch does not touch the store. Messages carrying the same
    /// `(collection, id)` are written once, with the last arrival winning, and
    /// share its outcome.
    #[instrument(skip(self, messages), fields(message_count = messages.len()))]
    pub async fn load(&self, messages: &[QueueMessage]) -> LoadReport {
        let mut report = LoadReport::new();
        if messages.is_empty() {
            return report;
        }

        let mut groups: BTreeMap<String, CollectionGroup> = BTreeMap::new();
        for message in messages {
            let decoded = decode_message(&message.body).and_then(|item| {
                let key = item.key()?;
                Ok((key, item))
            });
            match decoded {
                Ok((key, item)) => groups
                    .entry(key.collection)
                    .or_default()
                    .push(&message.message_id, item),
                Err(e) => {
                    debug!(message_id = %message.message_id, error = %e, "Rejected message");
                    report.record_failure(message.message_id.clone(), e);
                }
            }
        }

        for (collection, group) in &groups {
            self.load_collection(collection, group, &mut report).await;
        }

        info!(
            loaded = report.loaded_count(),
            failed = report.failure_count(),
            transient = report.transient_failure_count(),
            collections = groups.len(),
            "Loaded batch"
        );
        report
    }

    async fn load_collection(
        &self,
        collection: &str,
        group: &CollectionGroup,
        report: &mut LoadReport,
    ) {
        debug!(collection, item_count = group.len(), "Loading collection");

        let chunk_size = self.config.chunk_size;
        for (items, message_ids) in group
            .items
            .chunks(chunk_size)
            .zip(group.message_ids.chunks(chunk_size))
        {
            match self.repository.upsert_items(items).await {
                Ok(()) => {
                    for id in message_ids.iter().flatten() {
                        report.record_loaded(id.clone());
                    }
                }
                Err(e) => {
                    let error = LoadError::from(e);
                    warn!(
                        collection,
                        item_count = items.len(),
                        kind = error.kind(),
                        error = %error,
                        "Bulk upsert failed"
                    );

                    if error.is_transient() || items.len() == 1 {
                        for id in message_ids.iter().flatten() {
                            report.record_failure(id.clone(), error.clone());
                        }
                    } else {
                        self.load_one_by_one(items, message_ids, report).await;
                    }
                }
            }
        }
    }

    /// Write each item in its own transaction.
    async fn load_one_by_one(
        &self,
        items: &[CatalogItem],
        message_ids: &[Vec<String>],
        report: &mut LoadReport,
    ) {
        for (item, ids) in items.iter().zip(message_ids) {
            match self.repository.upsert_item(item).await {
                Ok(()) => {
                    for id in ids {
                        report.record_loaded(id.clone());
                    }
                }
                Err(e) => {
                    let error = LoadError::from(e);
                    warn!(
                        item_id = %item.id,
                        kind = error.kind(),
                        error = %error,
                        "Item upsert failed"
                    );
                    for id in ids {
                        report.record_failure(id.clone(), error.clone());
                    }
                }
            }
        }
    }
}

#[async_trait]
impl BatchHandler for BatchLoader {
    async fn handle(&self, batch: &[QueueMessage]) -> BatchResponse {
        let report = self.load(batch).await;
        for failure in &report.failures {
            error!(
                message_id = %failure.message_id,
                kind = failure.error.kind(),
                transient = failure.error.is_transient(),
                error = %failure.error,
                "Failed to load message"
            );
        }
        report.to_response()
    }
}
