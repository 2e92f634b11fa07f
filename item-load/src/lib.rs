//! # Item Load
//!
//! Load stage of the STAC ingest pipeline. Converts unordered, at-least-once
//! batches of catalog items into idempotent upserts and reports, per message,
//! which ones failed.
//!
//! ## Modules
//!
//! - [`config`]: Configuration and dependency initialization
//! - [`loader`]: Message decoding and the batch loader
//! - [`errors`]: Error types for loading

pub mod config;
pub mod errors;
pub mod loader;

pub use config::Dependencies;
pub use errors::LoadError;
pub use loader::{decode_message, BatchLoader, LoadReport};

use stac_ingest_queue::QueueError;
use stac_ingest_repository::CatalogRepositoryError;
use thiserror::Error;

/// Errors that can occur during service initialization or execution.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Catalog store error.
    #[error("Repository error: {0}")]
    RepositoryError(#[from] CatalogRepositoryError),

    /// Queue error.
    #[error("Queue error: {0}")]
    QueueError(#[from] QueueError),
}

impl ServiceError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
