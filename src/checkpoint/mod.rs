//! Checkpoint loading: a capability trait and the safetensors implementation.
//!
//! A checkpoint directory holds:
//! - `lit_model.safetensors`: model weights
//! - `lit_config.json`: [`ModelConfig`]
//! - `tokenizer.json` and `tokenizer_config.json`

mod loader;

use std::path::Path;

pub use loader::SafetensorsLoader;

use crate::config::ModelConfig;
use crate::model::LanguageModel;
use crate::tokenizer::TextTokenizer;

pub const WEIGHTS_FILE: &str = "lit_model.safetensors";
pub const CONFIG_FILE: &str = "lit_config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";

/// Files that must exist before anything is loaded
pub const REQUIRED_FILES: [&str; 4] = [WEIGHTS_FILE, CONFIG_FILE, TOKENIZER_FILE, TOKENIZER_CONFIG_FILE];

/// A ready-to-use model with its tokenizer and configuration
pub struct LoadedCheckpoint {
    pub config: ModelConfig,
    pub model: Box<dyn LanguageModel>,
    pub tokenizer: Box<dyn TextTokenizer>,
}

/// Produces a model and tokenizer from a checkpoint location.
pub trait CheckpointLoader {
    fn load(&self, checkpoint_dir: &Path) -> crate::Result<LoadedCheckpoint>;
}

/// Fail with `CheckpointNotFound` naming the first missing required file
pub fn check_files(checkpoint_dir: &Path) -> crate::Result<()> {
    if !checkpoint_dir.is_dir() {
        return Err(crate::ParrotError::CheckpointNotFound(format!(
            "checkpoint directory {} does not exist",
            checkpoint_dir.display()
        )));
    }

    for name in REQUIRED_FILES {
        let path = checkpoint_dir.join(name);
        if !path.is_file() {
            return Err(crate::ParrotError::CheckpointNotFound(path.display().to_string()));
        }
    }

    Ok(())
}
