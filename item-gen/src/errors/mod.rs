//! Error types for the generation stage.

use std::time::Duration;

use stac_ingest_queue::QueueError;
use stac_ingest_shared::ContractError;
use thiserror::Error;

/// Classified failure of one generation attempt.
#[derive(Error, Debug)]
pub enum GenerationError {
    /// The message is not a valid generation request.
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] ContractError),

    /// The transformation ran and failed, or produced no valid item.
    #[error("Transformation failed (exit code {exit_code:?}): {stderr}")]
    TransformationFailure {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The transformation did not finish within its time limit.
    #[error("Transformation timed out after {0:?}")]
    ExecutionTimeout(Duration),

    /// The transformation could not be run or its output could not be read.
    #[error("Execution infrastructure error: {0}")]
    ExecutionInfrastructureError(String),

    /// The produced item could not be handed to the load channel.
    #[error("Relay failed: {0}")]
    RelayFailure(#[from] QueueError),
}

impl GenerationError {
    /// Create a transformation failure without a process exit code.
    pub fn transformation(msg: impl Into<String>) -> Self {
        Self::TransformationFailure {
            exit_code: None,
            stderr: msg.into(),
        }
    }

    /// Create an infrastructure error.
    pub fn infrastructure(msg: impl Into<String>) -> Self {
        Self::ExecutionInfrastructureError(msg.into())
    }

    /// Short name of the failure class, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::TransformationFailure { .. } => "transformation_failure",
            Self::ExecutionTimeout(_) => "execution_timeout",
            Self::ExecutionInfrastructureError(_) => "execution_infrastructure_error",
            Self::RelayFailure(_) => "relay_failure",
        }
    }

    /// Whether another attempt with the same request may succeed.
    ///
    /// Permanent failures are still redelivered up to the receive limit; this only
    /// informs logging.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::InvalidRequest(_) | Self::TransformationFailure { .. } => false,
            Self::ExecutionTimeout(_) | Self::ExecutionInfrastructureError(_) => true,
            Self::RelayFailure(e) => e.is_transient(),
        }
    }
}
