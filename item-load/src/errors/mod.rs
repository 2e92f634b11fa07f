//! Error types for the load stage.

use stac_ingest_repository::CatalogRepositoryError;
use stac_ingest_shared::ContractError;
use thiserror::Error;

/// Classified failure of one message of a load batch.
///
/// Deduplicated messages share the outcome of their item, so errors are cloneable
/// and carry their cause as text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The message is not a catalog item with a collection. Never reaches the store.
    #[error("Malformed item: {0}")]
    MalformedItem(String),

    /// The store rejected the item itself, e.g. an unknown collection.
    #[error("Store constraint violation: {0}")]
    StoreConstraintViolation(String),

    /// The store could not be reached or did not answer in time.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Any other store failure.
    #[error("Store error: {0}")]
    StoreError(String),
}

impl LoadError {
    /// Short name of the failure class, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedItem(_) => "malformed_item",
            Self::StoreConstraintViolation(_) => "store_constraint_violation",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::StoreError(_) => "store_error",
        }
    }

    /// Whether another attempt with the same message may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<ContractError> for LoadError {
    fn from(err: ContractError) -> Self {
        Self::MalformedItem(err.to_string())
    }
}

impl From<CatalogRepositoryError> for LoadError {
    fn from(err: CatalogRepositoryError) -> Self {
        if err.is_constraint_violation() {
            Self::StoreConstraintViolation(err.to_string())
        } else if err.is_transient() {
            Self::StoreUnavailable(err.to_string())
        } else {
            Self::StoreError(err.to_string())
        }
    }
}
