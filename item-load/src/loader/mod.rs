//! Loader module for the load stage.
//!
//! Decodes load messages into catalog items and writes each batch to the
//! catalog store with idempotent upserts, reporting failures per message.

mod batch_loader;
mod decode;
mod report;

pub use batch_loader::{BatchLoader, LoaderConfig, DEFAULT_CHUNK_SIZE};
pub use decode::decode_message;
pub use report::{LoadFailure, LoadReport};
