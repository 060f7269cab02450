//! Parrot (GPT-NeoX style) model configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Model configuration loaded from `lit_config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Maximum context length the model attends over in one pass
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Tokenizer vocabulary size
    pub vocab_size: usize,

    /// Embedding and head rows are padded to a multiple of this
    #[serde(default = "default_padding_multiple")]
    pub padding_multiple: usize,

    /// Padded vocabulary size (number of logits per position)
    #[serde(default)]
    pub padded_vocab_size: Option<usize>,

    /// Number of transformer blocks
    pub n_layer: usize,

    /// Number of attention heads
    pub n_head: usize,

    /// Embedding dimension
    pub n_embd: usize,

    /// Fraction of each head that receives rotary embeddings
    #[serde(default = "default_rotary_percentage")]
    pub rotary_percentage: f64,

    /// Attention and MLP read the same block input
    #[serde(default = "default_true")]
    pub parallel_residual: bool,

    /// Linear layers carry a bias term
    #[serde(default = "default_true")]
    pub bias: bool,

    /// LayerNorm epsilon
    #[serde(default = "default_norm_eps")]
    pub norm_eps: f64,
}

fn default_block_size() -> usize {
    4096
}

fn default_padding_multiple() -> usize {
    512
}

fn default_rotary_percentage() -> f64 {
    0.25
}

fn default_true() -> bool {
    true
}

fn default_norm_eps() -> f64 {
    1e-5
}

/// Round `n` up to the next multiple of `k`
pub fn find_multiple(n: usize, k: usize) -> usize {
    if k == 0 || n % k == 0 {
        return n;
    }
    n + k - (n % k)
}

impl ModelConfig {
    /// Load configuration from a `lit_config.json` file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(content: &str) -> crate::Result<Self> {
        let mut config: ModelConfig = serde_json::from_str(content)?;
        if config.padded_vocab_size.is_none() {
            config.padded_vocab_size = Some(find_multiple(config.vocab_size, config.padding_multiple));
        }
        config.validate()?;
        Ok(config)
    }

    /// Number of logits the model produces per position
    pub fn padded_vocab_size(&self) -> usize {
        self.padded_vocab_size
            .unwrap_or_else(|| find_multiple(self.vocab_size, self.padding_multiple))
    }

    /// Per-head dimension
    pub fn head_size(&self) -> usize {
        self.n_embd / self.n_head
    }

    /// Number of leading head dimensions that are rotated
    pub fn rope_n_elem(&self) -> usize {
        let n_elem = (self.rotary_percentage * self.head_size() as f64) as usize;
        // rotate-half needs an even count
        n_elem - n_elem % 2
    }

    /// Reject configurations the model cannot be built from
    pub fn validate(&self) -> crate::Result<()> {
        let dims = [
            ("block_size", self.block_size),
            ("vocab_size", self.vocab_size),
            ("n_layer", self.n_layer),
            ("n_head", self.n_head),
            ("n_embd", self.n_embd),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(crate::ParrotError::Config(format!("{} must be positive", name)));
            }
        }

        if self.n_embd % self.n_head != 0 {
            return Err(crate::ParrotError::Config(format!(
                "n_embd ({}) is not divisible by n_head ({})",
                self.n_embd, self.n_head
            )));
        }

        if self.padded_vocab_size() < self.vocab_size {
            return Err(crate::ParrotError::Config(format!(
                "padded_vocab_size ({}) is smaller than vocab_size ({})",
                self.padded_vocab_size(),
                self.vocab_size
            )));
        }

        if !(0.0..=1.0).contains(&self.rotary_percentage) {
            return Err(crate::ParrotError::Config(format!(
                "rotary_percentage must be in [0, 1], got {}",
                self.rotary_percentage
            )));
        }

        Ok(())
    }

    /// Small configuration for tests and smoke runs
    pub fn tiny(block_size: usize, vocab_size: usize) -> Self {
        Self {
            block_size,
            vocab_size,
            padding_multiple: 1,
            padded_vocab_size: Some(vocab_size),
            n_layer: 1,
            n_head: 4,
            n_embd: 8,
            rotary_percentage: 1.0,
            parallel_residual: true,
            bias: true,
            norm_eps: default_norm_eps(),
        }
    }
}

impl fmt::Display for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{'block_size': {}, 'vocab_size': {}, 'padding_multiple': {}, 'padded_vocab_size': {}, \
             'n_layer': {}, 'n_head': {}, 'n_embd': {}, 'rotary_percentage': {}, \
             'parallel_residual': {}, 'bias': {}}}",
            self.block_size,
            self.vocab_size,
            self.padding_multiple,
            self.padded_vocab_size(),
            self.n_layer,
            self.n_head,
            self.n_embd,
            self.rotary_percentage,
            self.parallel_residual,
            self.bias,
        )
    }
}
