//! Configuration module for model settings loaded from checkpoints.

mod model_config;

pub use model_config::{find_multiple, ModelConfig};
