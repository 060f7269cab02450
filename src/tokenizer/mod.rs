//! Tokenizer interface and the HuggingFace `tokenizers` implementation.

use std::path::Path;

use serde::Deserialize;

/// Text to token ids and back.
pub trait TextTokenizer: Send + Sync {
    fn encode(&self, text: &str) -> crate::Result<Vec<u32>>;

    fn decode(&self, ids: &[u32]) -> crate::Result<String>;

    /// End-of-sequence token, if the tokenizer defines one
    fn eos_id(&self) -> Option<u32>;
}

/// A special token entry in `tokenizer_config.json`: either a bare string or
/// an added-token object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SpecialToken {
    Text(String),
    Added { content: String },
}

impl SpecialToken {
    fn content(&self) -> &str {
        match self {
            SpecialToken::Text(s) => s,
            SpecialToken::Added { content } => content,
        }
    }
}

/// The fields of `tokenizer_config.json` that generation uses
#[derive(Debug, Clone, Default, Deserialize)]
struct TokenizerConfig {
    #[serde(default)]
    eos_token: Option<SpecialToken>,
}

/// Wrapper around `tokenizers::Tokenizer`
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    eos_id: Option<u32>,
}

impl HfTokenizer {
    /// Load `tokenizer.json` and `tokenizer_config.json` from a checkpoint directory
    pub fn from_dir(dir: impl AsRef<Path>) -> crate::Result<Self> {
        let dir = dir.as_ref();
        let inner = tokenizers::Tokenizer::from_file(dir.join("tokenizer.json"))
            .map_err(|e| crate::ParrotError::Tokenizer(format!("Failed to load tokenizer: {}", e)))?;

        let config_path = dir.join("tokenizer_config.json");
        let content = std::fs::read_to_string(&config_path)?;
        let config: TokenizerConfig = if content.trim().is_empty() {
            TokenizerConfig::default()
        } else {
            serde_json::from_str(&content)?
        };

        Ok(Self::with_config(inner, &config))
    }

    fn with_config(inner: tokenizers::Tokenizer, config: &TokenizerConfig) -> Self {
        let eos_id = config.eos_token.as_ref().and_then(|t| {
            let id = inner.token_to_id(t.content());
            if id.is_none() {
                tracing::warn!("end-of-sequence token {:?} is not in the vocabulary", t.content());
            }
            id
        });
        Self { inner, eos_id }
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> crate::Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| crate::ParrotError::Tokenizer(format!("Tokenization failed: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> crate::Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| crate::ParrotError::Tokenizer(format!("Decoding failed: {}", e)))
    }

    fn eos_id(&self) -> Option<u32> {
        self.eos_id
    }
}
