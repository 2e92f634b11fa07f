//! # STAC Ingest Shared
//!
//! This crate defines the message contracts that flow through the ingest pipeline:
//! the [`GenerationRequest`] consumed by the generation stage and the [`CatalogItem`]
//! consumed by the load stage, together with the natural key ([`ItemKey`]) the catalog
//! store upserts by.

pub mod errors;
pub mod types;

pub use errors::ContractError;
pub use types::catalog_item::{CatalogItem, ItemKey, ItemProperties};
pub use types::generation_request::GenerationRequest;
pub use types::geometry::{Geometry, Position};
