//! This module defines the records exchanged between the pipeline stages.
//! It re-exports the request, item and geometry types.

pub mod catalog_item;
pub mod generation_request;
pub mod geometry;

pub use catalog_item::{CatalogItem, ItemKey, ItemProperties};
pub use generation_request::GenerationRequest;
pub use geometry::{Geometry, Position};
