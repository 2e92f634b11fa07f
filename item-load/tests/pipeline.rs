//! End-to-end tests of the ingest pipeline.
//!
//! Both stage workers run over in-memory queues. A mock executor derives items from
//! the request arguments the way a stactools package would, and the catalog store
//! is the in-memory repository.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use item_gen::executor::finalize_item;
use item_gen::{GenerationError, GenerationExecutor, ItemGenerator, Relay};
use item_load::BatchLoader;
use serde_json::{json, Value};
use stac_ingest_queue::{
    InMemoryQueue, MessageQueue, RetryPolicy, Stage, StageWorker, WorkerConfig,
};
use stac_ingest_repository::{CatalogRepository, InMemoryCatalogRepository};
use stac_ingest_shared::{CatalogItem, GenerationRequest, ItemKey};

/// Names the item after the asset file and files it under the request group.
struct AssetExecutor;

#[async_trait]
impl GenerationExecutor for AssetExecutor {
    async fn generate(&self, request: &GenerationRequest) -> Result<CatalogItem, GenerationError> {
        let href = request
            .create_item_args
            .first()
            .ok_or_else(|| GenerationError::transformation("no asset argument"))?;
        let file = href.rsplit('/').next().unwrap_or(href);
        let id = file.split('.').next().unwrap_or(file);
        let platform = request
            .create_item_options
            .get("platform")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());

        finalize_item(item_document(&request.group_name, id, href, &platform), request)
    }
}

fn item_document(collection: &str, id: &str, href: &str, platform: &str) -> Value {
    json!({
        "type": "Feature",
        "stac_version": "1.0.0",
        "id": id,
        "collection": collection,
        "geometry": {
            "type": "Polygon",
            "coordinates": [[[-90.0, 40.0], [-80.0, 40.0], [-80.0, 50.0], [-90.0, 50.0], [-90.0, 40.0]]]
        },
        "properties": {"datetime": "2021-01-01T00:00:00Z", "platform": platform},
        "assets": {"data": {"href": href}},
        "links": []
    })
}

struct Pipeline {
    generation: Arc<InMemoryQueue>,
    load: Arc<InMemoryQueue>,
    repository: Arc<InMemoryCatalogRepository>,
    generation_worker: StageWorker,
    load_worker: StageWorker,
}

fn pipeline(collections: &[&str]) -> Pipeline {
    let generation = Arc::new(InMemoryQueue::new(RetryPolicy::for_stage(Stage::Generation)));
    let load = Arc::new(InMemoryQueue::new(RetryPolicy::for_stage(Stage::Load)));
    let repository = Arc::new(InMemoryCatalogRepository::with_collections(
        collections.iter().copied(),
    ));

    let generator = ItemGenerator::new(Arc::new(AssetExecutor), Relay::new(load.clone()));
    let generation_worker = StageWorker::new(
        Stage::Generation,
        generation.clone(),
        Arc::new(generator),
        WorkerConfig {
            batch_window: Duration::ZERO,
            ..WorkerConfig::for_stage(Stage::Generation)
        },
    );

    let loader = BatchLoader::new(repository.clone());
    let load_worker = StageWorker::new(
        Stage::Load,
        load.clone(),
        Arc::new(loader),
        WorkerConfig {
            batch_window: Duration::ZERO,
            ..WorkerConfig::for_stage(Stage::Load)
        },
    );

    Pipeline {
        generation,
        load,
        repository,
        generation_worker,
        load_worker,
    }
}

fn request_body(platform: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "package_name": "pkg-a",
        "group_name": "g",
        "create_item_args": ["https://example/asset.tif"],
        "create_item_options": {"platform": platform}
    }))
    .unwrap()
}

fn item_body(collection: &str, id: &str) -> Vec<u8> {
    serde_json::to_vec(&item_document(collection, id, "https://example/x.tif", "x")).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_request_becomes_one_catalog_row() {
    let pipeline = pipeline(&["g"]);
    pipeline.generation.send(request_body("landsat-8")).await;

    assert_eq!(pipeline.generation_worker.run_once().await.unwrap(), 1);
    assert_eq!(pipeline.load_worker.run_once().await.unwrap(), 1);

    assert!(pipeline.generation.is_empty().await);
    assert!(pipeline.load.is_empty().await);
    assert_eq!(pipeline.repository.count_items("g").await.unwrap(), 1);
    let stored = pipeline
        .repository
        .get_item(&ItemKey::new("g", "asset"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.properties.extra["platform"], json!("landsat-8"));
}

#[tokio::test(start_paused = true)]
async fn test_resubmission_replaces_the_row() {
    let pipeline = pipeline(&["g"]);

    for platform in ["landsat-8", "landsat-9"] {
        pipeline.generation.send(request_body(platform)).await;
        pipeline.generation_worker.run_once().await.unwrap();
        pipeline.load_worker.run_once().await.unwrap();
    }

    assert_eq!(pipeline.repository.count_items("g").await.unwrap(), 1);
    let stored = pipeline
        .repository
        .get_item(&ItemKey::new("g", "asset"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.properties.extra["platform"], json!("landsat-9"));
}

#[tokio::test(start_paused = true)]
async fn test_direct_entry_matches_generated_item() {
    let generated = pipeline(&["g"]);
    generated.generation.send(request_body("landsat-8")).await;
    generated.generation_worker.run_once().await.unwrap();
    generated.load_worker.run_once().await.unwrap();

    let direct = pipeline(&["g"]);
    let document = item_document("g", "asset", "https://example/asset.tif", "landsat-8");
    direct.load.send(serde_json::to_vec(&document).unwrap()).await;
    direct.load_worker.run_once().await.unwrap();

    let key = ItemKey::new("g", "asset");
    assert_eq!(
        generated.repository.get_item(&key).await.unwrap(),
        direct.repository.get_item(&key).await.unwrap()
    );
    assert_eq!(generated.repository.items().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_messages_stay_for_redelivery() {
    let pipeline = pipeline(&["g"]);
    for i in 0..4 {
        pipeline.load.send(item_body("g", &i.to_string())).await;
    }
    pipeline.load.send(b"not json".to_vec()).await;
    pipeline.load.send(b"{\"id\": \"no-geometry\"}".to_vec()).await;

    assert_eq!(pipeline.load_worker.run_once().await.unwrap(), 6);

    assert_eq!(pipeline.repository.count_items("g").await.unwrap(), 4);
    assert_eq!(pipeline.load.len().await, 2);
    assert_eq!(pipeline.load_worker.stats().failures, 2);
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_is_isolated_to_its_items() {
    let pipeline = pipeline(&["g"]);
    pipeline.load.send(item_body("g", "1")).await;
    pipeline.load.send(item_body("unknown", "1")).await;
    pipeline.load.send(item_body("g", "2")).await;

    pipeline.load_worker.run_once().await.unwrap();

    assert_eq!(pipeline.repository.count_items("g").await.unwrap(), 2);
    assert_eq!(pipeline.load.len().await, 1);
    let redelivered = pipeline.load.receive(10, Duration::ZERO).await.unwrap();
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].body, item_body("unknown", "1"));
    assert_eq!(redelivered[0].receive_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_empty_batch_leaves_store_untouched() {
    let pipeline = pipeline(&["g"]);

    assert_eq!(pipeline.load_worker.run_once().await.unwrap(), 0);

    assert_eq!(pipeline.repository.accesses(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unloadable_item_is_dead_lettered_after_five_deliveries() {
    let pipeline = pipeline(&["g"]);
    let body = item_body("unknown", "1");
    pipeline.load.send(body.clone()).await;

    for _ in 0..5 {
        assert_eq!(pipeline.load_worker.run_once().await.unwrap(), 1);
    }
    assert_eq!(pipeline.load_worker.run_once().await.unwrap(), 0);

    let dead = pipeline.load.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].body, body);
    assert_eq!(dead[0].channel, "item-load-dlq");
    assert!(pipeline.load.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_store_outage_recovers_on_redelivery() {
    let pipeline = pipeline(&["g"]);
    pipeline.load.send(item_body("g", "1")).await;
    pipeline.repository.set_offline(true);

    pipeline.load_worker.run_once().await.unwrap();
    assert_eq!(pipeline.load.len().await, 1);

    pipeline.repository.set_offline(false);
    pipeline.load_worker.run_once().await.unwrap();

    assert!(pipeline.load.is_empty().await);
    assert_eq!(pipeline.repository.count_items("g").await.unwrap(), 1);
}
