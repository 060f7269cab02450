//! Generation configuration.

use serde::{Deserialize, Serialize};

/// Configuration for one generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Maximum number of new tokens to generate
    pub max_new_tokens: usize,

    /// Hard cap on the final sequence length (prompt included).
    /// Defaults to prompt length + `max_new_tokens`.
    #[serde(default)]
    pub max_seq_length: Option<usize>,

    /// Temperature for sampling, must be > 0
    pub temperature: f32,

    /// Keep only scores at or above the k-th largest (None = disabled)
    #[serde(default)]
    pub top_k: Option<usize>,

    /// Token that ends generation; it is kept in the output
    #[serde(default)]
    pub stop_token: Option<u32>,

    /// Random seed for reproducibility
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 50,
            max_seq_length: None,
            temperature: 1.0,
            top_k: None,
            stop_token: None,
            seed: None,
        }
    }
}

impl GenerationConfig {
    /// Set max new tokens
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_new_tokens = max_tokens;
        self
    }

    /// Set the sequence length cap
    pub fn with_max_seq_length(mut self, max_seq_length: usize) -> Self {
        self.max_seq_length = Some(max_seq_length);
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = temp;
        self
    }

    /// Set top-k
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Set the stop token
    pub fn with_stop_token(mut self, token: u32) -> Self {
        self.stop_token = Some(token);
        self
    }

    /// Set the seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Final sequence length cap for a prompt of `prompt_len` tokens.
    ///
    /// `L = min(T + max_new_tokens, max_seq_length)`.
    pub fn length_cap(&self, prompt_len: usize) -> crate::Result<usize> {
        if prompt_len == 0 {
            return Err(crate::ParrotError::InvalidArgument(
                "prompt must contain at least one token".to_string(),
            ));
        }

        let budget = prompt_len.saturating_add(self.max_new_tokens);
        match self.max_seq_length {
            Some(max_seq_length) if max_seq_length < prompt_len => {
                Err(crate::ParrotError::InvalidArgument(format!(
                    "max_seq_length ({}) is shorter than the prompt ({} tokens)",
                    max_seq_length, prompt_len
                )))
            }
            Some(max_seq_length) => Ok(budget.min(max_seq_length)),
            None => Ok(budget),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_cap() {
        let config = GenerationConfig::default().with_max_tokens(20);
        assert_eq!(config.length_cap(5).unwrap(), 25);
        assert_eq!(config.clone().with_max_seq_length(10).length_cap(5).unwrap(), 10);
        assert_eq!(config.clone().with_max_seq_length(9999).length_cap(5).unwrap(), 25);
        assert_eq!(config.with_max_seq_length(5).length_cap(5).unwrap(), 5);
    }

    #[test]
    fn test_length_cap_rejects_short_cap() {
        let config = GenerationConfig::default().with_max_seq_length(3);
        assert!(matches!(
            config.length_cap(5),
            Err(crate::ParrotError::InvalidArgument(_))
        ));
        assert!(matches!(
            GenerationConfig::default().length_cap(0),
            Err(crate::ParrotError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: GenerationConfig =
            serde_json::from_str(r#"{"max_new_tokens": 8, "temperature": 0.5}"#).unwrap();
        assert_eq!(config.max_new_tokens, 8);
        assert_eq!(config.top_k, None);
        assert_eq!(config.stop_token, None);
    }
}
