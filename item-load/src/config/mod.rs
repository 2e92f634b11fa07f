//! Configuration module for the load stage.

mod dependencies;

pub use dependencies::{ConnectionMode, Dependencies, LoadSettings};
