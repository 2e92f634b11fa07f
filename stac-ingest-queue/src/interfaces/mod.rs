//! Trait seams between the stages and the queue substrate.

mod batch_handler;
mod message_queue;
mod publisher;

pub use batch_handler::BatchHandler;
pub use message_queue::MessageQueue;
pub use publisher::Publisher;
