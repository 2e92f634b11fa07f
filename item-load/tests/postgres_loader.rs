//! Integration tests for the batch loader against PostgreSQL.
//!
//! Run with: `cargo test --test postgres_loader`

use std::sync::Arc;

use item_load::{BatchLoader, LoadError};
use serde_json::{json, Value};
use stac_ingest_queue::{BatchHandler, QueueMessage};
use stac_ingest_repository::{CatalogRepository, PostgresCatalogRepository};
use stac_ingest_shared::ItemKey;

fn item_document(collection: &str, id: &str, platform: &str) -> Value {
    json!({
        "type": "Feature",
        "id": id,
        "collection": collection,
        "geometry": {"type": "Point", "coordinates": [-85.0, 45.0]},
        "properties": {"datetime": "2021-01-01T00:00:00Z", "platform": platform}
    })
}

fn message(message_id: &str, document: &Value) -> QueueMessage {
    QueueMessage::new(message_id, serde_json::to_vec(document).unwrap(), 1)
}

async fn make_repository(pool: &sqlx::PgPool) -> Arc<PostgresCatalogRepository> {
    let repository = PostgresCatalogRepository::new(pool.clone());
    repository
        .upsert_collection("g", &json!({"id": "g", "type": "Collection"}))
        .await
        .unwrap();
    Arc::new(repository)
}

#[sqlx::test(migrations = "../stac-ingest-repository/src/postgres/migrations")]
async fn test_duplicate_keys_in_one_batch(pool: sqlx::PgPool) {
    let repository = make_repository(&pool).await;
    let loader = BatchLoader::new(repository.clone());
    let batch = vec![
        message("m-1", &item_document("g", "asset", "first")),
        message("m-2", &item_document("g", "other", "first")),
        message("m-3", &item_document("g", "asset", "second")),
    ];

    let response = loader.handle(&batch).await;

    assert!(response.is_success());
    assert_eq!(repository.count_items("g").await.unwrap(), 2);
    let stored = repository
        .get_item(&ItemKey::new("g", "asset"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.properties.extra["platform"], json!("second"));
}

#[sqlx::test(migrations = "../stac-ingest-repository/src/postgres/migrations")]
async fn test_unknown_collection_is_a_constraint_violation(pool: sqlx::PgPool) {
    let repository = make_repository(&pool).await;
    let loader = BatchLoader::new(repository.clone());
    let batch = vec![
        message("m-1", &item_document("g", "1", "x")),
        message("m-2", &item_document("missing", "1", "x")),
        message("m-3", &item_document("missing", "2", "x")),
    ];

    let report = loader.load(&batch).await;

    assert_eq!(report.loaded, vec!["m-1".to_string()]);
    assert_eq!(report.failure_count(), 2);
    assert!(report
        .failures
        .iter()
        .all(|failure| matches!(failure.error, LoadError::StoreConstraintViolation(_))));
    assert_eq!(repository.count_items("g").await.unwrap(), 1);
    assert_eq!(repository.count_items("missing").await.unwrap(), 0);
}

#[sqlx::test(migrations = "../stac-ingest-repository/src/postgres/migrations")]
async fn test_redelivered_batch_is_idempotent(pool: sqlx::PgPool) {
    let repository = make_repository(&pool).await;
    let loader = BatchLoader::new(repository.clone());
    let batch: Vec<QueueMessage> = (0..50)
        .map(|i| message(&format!("m-{i}"), &item_document("g", &i.to_string(), "x")))
        .collect();

    assert!(loader.handle(&batch).await.is_success());
    assert!(loader.handle(&batch).await.is_success());

    assert_eq!(repository.count_items("g").await.unwrap(), 50);
}

#[sqlx::test(migrations = "../stac-ingest-repository/src/postgres/migrations")]
async fn test_rejected_row_fails_alone_after_bulk_failure(pool: sqlx::PgPool) {
    let repository = make_repository(&pool).await;
    let loader = BatchLoader::new(repository.clone());
    // Postgres refuses NUL bytes in text, which fails the whole bulk statement
    let batch = vec![
        message("m-1", &item_document("g", "1", "x")),
        message("m-2", &item_document("g", "bad\u{0000}id", "x")),
        message("m-3", &item_document("g", "3", "x")),
    ];

    let report = loader.load(&batch).await;

    assert_eq!(report.loaded, vec!["m-1".to_string(), "m-3".to_string()]);
    assert_eq!(report.failure_count(), 1);
    assert_eq!(report.failures[0].message_id, "m-2");
    assert!(matches!(report.failures[0].error, LoadError::StoreError(_)));
    assert_eq!(repository.count_items("g").await.unwrap(), 2);
    assert!(repository
        .get_item(&ItemKey::new("g", "3"))
        .await
        .unwrap()
        .is_some());
}
