//! This module defines and re-exports the interfaces for the catalog repository.
mod catalog;

pub use catalog::CatalogRepository;
