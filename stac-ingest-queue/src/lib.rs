//! # STAC Ingest Queue
//!
//! Queue substrate for the two ingest stages. Both stages consume batches of
//! messages with at-least-once delivery and report back, per message, which ones
//! failed; everything else in the batch is acknowledged.
//!
//! ## Modules
//!
//! - [`policy`]: Retry/dead-letter policy and the per-message delivery state machine
//! - [`message`]: Queue messages and the partial batch response contract
//! - [`interfaces`]: The `MessageQueue`, `Publisher` and `BatchHandler` seams
//! - [`memory`]: Lease-based in-memory queue
//! - [`kafka`]: Kafka-backed queue and publisher
//! - [`worker`]: Loop that drives one stage against a queue
//! - [`errors`]: Error types for queue operations

pub mod errors;
pub mod interfaces;
pub mod kafka;
pub mod memory;
pub mod message;
pub mod policy;
pub mod worker;

pub use errors::QueueError;
pub use interfaces::{BatchHandler, MessageQueue, Publisher};
pub use kafka::{KafkaConfig, KafkaPublisher, KafkaQueue};
pub use memory::{DeadLetter, InMemoryQueue};
pub use message::{BatchItemFailure, BatchResponse, QueueMessage};
pub use policy::{DeliveryEvent, DeliveryState, RetryPolicy, Stage};
pub use worker::{StageWorker, WorkerConfig, WorkerStats};
