//! # rs-parrot
//!
//! Text generation for GPT-NeoX style ("Parrot") language models.
//!
//! ## Core Concept
//!
//! Generation is a bounded, cache-aware sampling loop:
//! - **Sliding window**: the model never attends to more than `block_size`
//!   trailing positions
//! - **Incremental forward**: each step scores only the newest token, reusing
//!   keys and values from a rotating cache of `block_size` slots
//! - **Seedable sampling**: temperature and top-k sampling draw from an
//!   injected random source, so runs are reproducible
//!
//! ## Example
//!
//! ```ignore
//! use rs_parrot::{GenerationConfig, GenerationDriver, SafetensorsLoader, SampleRequest};
//! use rs_parrot::generation::CancelToken;
//!
//! fn main() -> anyhow::Result<()> {
//!     let loader = SafetensorsLoader::new(candle_core::Device::Cpu, candle_core::DType::F32);
//!     let driver = GenerationDriver::from_checkpoint(&loader, "checkpoints/tiny".as_ref())?;
//!     let request = SampleRequest::new("Hello, my name is", 2, GenerationConfig::default());
//!     driver.run(&request, &mut std::io::stdout(), &CancelToken::never(), |_| {})?;
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod generation;
pub mod model;
pub mod tokenizer;
pub mod utils;

// Re-exports for convenience
pub use checkpoint::{CheckpointLoader, LoadedCheckpoint, SafetensorsLoader};
pub use config::ModelConfig;
pub use driver::{GenerationDriver, SampleRequest, SampleStats};
pub use generation::{generate, generate_with_cancel, GenerationConfig, KvCache, Sampler, SequenceBuffer};
pub use model::{LanguageModel, ParrotModel};
pub use tokenizer::{HfTokenizer, TextTokenizer};
pub use utils::{Device, DType};

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum ParrotError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Sequence capacity of {capacity} tokens exceeded")]
    CapacityExceeded { capacity: usize },

    #[error("Model execution failed: {0}")]
    ModelExecution(#[from] candle_core::Error),

    #[error("Generation cancelled: {0}")]
    Cancelled(String),

    #[error("Checkpoint file not found: {0}")]
    CheckpointNotFound(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ParrotError {
    /// Wrap a model failure that did not originate in candle
    pub fn model(msg: impl Into<String>) -> Self {
        ParrotError::ModelExecution(candle_core::Error::Msg(msg.into()))
    }
}

pub type Result<T> = std::result::Result<T, ParrotError>;
