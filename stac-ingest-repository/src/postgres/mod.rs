//! PostgreSQL implementation of the catalog repository.
//!
//! ## Key Features
//!
//! - Connection pooling with `sqlx::PgPool`, bounded acquire and statement timeouts
//! - Multi-row upserts with `QueryBuilder::push_values` and `ON CONFLICT DO UPDATE`
//! - ACID transactions with automatic rollback on drop
//!
//! ## Database Tables
//!
//! - `collections`: Pre-provisioned collections referenced by items
//! - `items`: Catalog items keyed by `(collection, id)`, with indexed temporal
//!   columns and the full document in `content`
mod catalog_repository;

pub use catalog_repository::PostgresCatalogRepository;

use std::time::Duration;

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub url: String,
    pub max_connections: u32,
    /// Maximum wait for a pooled connection.
    pub acquire_timeout: Duration,
    /// Server-side limit for a single statement.
    pub statement_timeout: Duration,
}

impl PoolConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(10),
            statement_timeout: Duration::from_secs(30),
        }
    }
}
