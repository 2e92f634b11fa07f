//! # STAC Ingest Repository
//! This crate provides the catalog store used by the load stage: the
//! `CatalogRepository` trait, its PostgreSQL implementation with natural-key
//! upserts, an in-memory implementation, and the SQL migrations.
pub mod errors;
pub mod interfaces;
pub mod memory;
pub mod postgres;

pub use errors::CatalogRepositoryError;
pub use interfaces::CatalogRepository;
pub use memory::InMemoryCatalogRepository;
pub use postgres::{PoolConfig, PostgresCatalogRepository};
