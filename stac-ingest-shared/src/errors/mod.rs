//! Error types for decoding and validating pipeline records.
use thiserror::Error;

/// Represents a record that cannot be accepted by a pipeline stage.
///
/// Every variant is permanent: redelivering the same payload yields the same error.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("Malformed document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),
}

impl ContractError {
    /// Create an invalid field error.
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Create an invalid geometry error.
    pub fn geometry(reason: impl Into<String>) -> Self {
        Self::InvalidGeometry(reason.into())
    }
}
