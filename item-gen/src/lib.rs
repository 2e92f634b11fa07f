//! # Item Gen
//!
//! Generation stage of the STAC ingest pipeline. Consumes generation requests,
//! runs the requested stactools transformation for each one and relays every
//! produced item onto the load channel.
//!
//! ## Architecture
//!
//! 1. **Executor**: Runs the external transformation for one request
//! 2. **Relay**: Publishes a produced item onto the load channel
//! 3. **Generator**: Batch handler tying both together per message
//! 4. **Worker**: The shared stage worker driving the generation queue
//!
//! ## Modules
//!
//! - [`config`]: Configuration and dependency initialization
//! - [`executor`]: The `GenerationExecutor` seam and the `uvx` implementation
//! - [`relay`]: Hand-off of produced items to the load channel
//! - [`generator`]: Per-batch generation handler
//! - [`errors`]: Error types for generation

pub mod config;
pub mod errors;
pub mod executor;
pub mod generator;
pub mod relay;

pub use config::Dependencies;
pub use errors::GenerationError;
pub use executor::{GenerationExecutor, UvxExecutor};
pub use generator::ItemGenerator;
pub use relay::Relay;

use stac_ingest_queue::QueueError;
use thiserror::Error;

/// Errors that can occur during service initialization or execution.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

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
