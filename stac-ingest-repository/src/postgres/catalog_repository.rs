use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use stac_ingest_shared::{CatalogItem, ItemKey};
use tracing::{debug, info};

use super::PoolConfig;
use crate::{CatalogRepository, CatalogRepositoryError};

/// Rows per `INSERT` statement. Eight binds per row keeps a full statement far
/// below the PostgreSQL limit of 65535 parameters.
const MAX_ROWS_PER_STATEMENT: usize = 1000;

/// Column values of one `items` row.
struct ItemRow<'a> {
    collection: &'a str,
    id: &'a str,
    geometry: Value,
    bbox: Option<Value>,
    datetime: Option<DateTime<Utc>>,
    end_datetime: Option<DateTime<Utc>>,
    content: Value,
}

impl<'a> ItemRow<'a> {
    fn from_item(item: &'a CatalogItem) -> Result<Self, CatalogRepositoryError> {
        let collection = item
            .collection
            .as_deref()
            .filter(|collection| !collection.trim().is_empty())
            .ok_or_else(|| {
                CatalogRepositoryError::ConstraintViolation(format!(
                    "item {} has no collection",
                    item.id
                ))
            })?;
        let extent = item.temporal_extent();

        Ok(Self {
            collection,
            id: &item.id,
            geometry: serde_json::to_value(&item.geometry)?,
            bbox: item.effective_bbox().map(Value::from),
            datetime: extent.map(|(start, _)| start),
            end_datetime: extent.map(|(_, end)| end),
            content: serde_json::to_value(item)?,
        })
    }
}

/// PostgreSQL implementation of the catalog repository.
pub struct PostgresCatalogRepository {
    pool: PgPool,
}

impl PostgresCatalogRepository {
    /// Creates a repository on an existing pool with the catalog schema.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool configured with `config`.
    pub async fn connect(config: &PoolConfig) -> Result<Self, CatalogRepositoryError> {
        let statement_timeout = format!("{}ms", config.statement_timeout.as_millis());
        let options = PgConnectOptions::from_str(&config.url)?
            .options([("statement_timeout", statement_timeout.as_str())]);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await?;

        info!(
            max_connections = config.max_connections,
            statement_timeout = %statement_timeout,
            "Connected to catalog store"
        );
        Ok(Self { pool })
    }

    /// Applies the bundled migrations.
    pub async fn migrate(&self) -> Result<(), CatalogRepositoryError> {
        sqlx::migrate!("src/postgres/migrations")
            .run(&self.pool)
            .await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Upserts items within an active transaction, one multi-row statement per chunk.
    async fn upsert_items_tx(
        &self,
        items: &[CatalogItem],
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<(), CatalogRepositoryError> {
        if items.is_empty() {
            return Ok(());
        }

        let rows = items
            .iter()
            .map(ItemRow::from_item)
            .collect::<Result<Vec<_>, _>>()?;
        let updated_at = Utc::now();

        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut query_builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO items (collection, id, geometry, bbox, datetime, end_datetime, content, updated_at) ",
            );

            query_builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.collection)
                    .push_bind(row.id)
                    .push_bind(&row.geometry)
                    .push_bind(&row.bbox)
                    .push_bind(row.datetime)
                    .push_bind(row.end_datetime)
                    .push_bind(&row.content)
                    .push_bind(updated_at);
            });

            query_builder.push(
                " ON CONFLICT (collection, id) DO UPDATE SET \
                 geometry = EXCLUDED.geometry, \
                 bbox = EXCLUDED.bbox, \
                 datetime = EXCLUDED.datetime, \
                 end_datetime = EXCLUDED.end_datetime, \
                 content = EXCLUDED.content, \
                 updated_at = EXCLUDED.updated_at",
            );

            query_builder.build().execute(&mut **tx).await?;
            debug!(rows = chunk.len(), "Upserted item rows");
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogRepository for PostgresCatalogRepository {
    async fn upsert_item(&self, item: &CatalogItem) -> Result<(), CatalogRepositoryError> {
        self.upsert_items(std::slice::from_ref(item)).await
    }

    async fn upsert_items(&self, items: &[CatalogItem]) -> Result<(), CatalogRepositoryError> {
        if items.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        self.upsert_items_tx(items, &mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_item(&self, key: &ItemKey) -> Result<Option<CatalogItem>, CatalogRepositoryError> {
        let content: Option<Value> =
            sqlx::query_scalar("SELECT content FROM items WHERE collection = $1 AND id = $2")
                .bind(&key.collection)
                .bind(&key.id)
                .fetch_optional(&self.pool)
                .await?;

        content
            .map(|content| serde_json::from_value(content).map_err(CatalogRepositoryError::from))
            .transpose()
    }

    async fn count_items(&self, collection: &str) -> Result<i64, CatalogRepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE collection = $1")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn upsert_collection(
        &self,
        collection_id: &str,
        content: &Value,
    ) -> Result<(), CatalogRepositoryError> {
        sqlx::query(
            "INSERT INTO collections (id, content) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET content = EXCLUDED.content",
        )
        .bind(collection_id)
        .bind(content)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn check_tables_created(&self) -> Result<bool, CatalogRepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name IN ('collections', 'items')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count == 2)
    }
}
