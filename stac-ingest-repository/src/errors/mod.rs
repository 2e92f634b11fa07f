//! Error types for the catalog repository.
mod catalog;

pub use catalog::CatalogRepositoryError;
