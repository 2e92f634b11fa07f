//! Configuration module for the generation stage.

mod dependencies;

pub use dependencies::{Dependencies, GenerationSettings};
