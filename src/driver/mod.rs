//! Multi-sample text generation on top of a model and tokenizer.

use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::checkpoint::CheckpointLoader;
use crate::config::ModelConfig;
use crate::generation::{generate_with_cancel, CancelToken, GenerationConfig};
use crate::model::LanguageModel;
use crate::tokenizer::TextTokenizer;

/// What to generate.
#[derive(Debug, Clone)]
pub struct SampleRequest {
    /// Prompt text
    pub prompt: String,
    /// Number of independent samples
    pub num_samples: usize,
    /// Loop parameters shared by every sample
    pub generation: GenerationConfig,
    /// Stop each sample at the tokenizer's end-of-sequence token
    pub stop_at_eos: bool,
}

impl SampleRequest {
    pub fn new(prompt: impl Into<String>, num_samples: usize, generation: GenerationConfig) -> Self {
        Self {
            prompt: prompt.into(),
            num_samples,
            generation,
            stop_at_eos: false,
        }
    }

    pub fn with_stop_at_eos(mut self, stop_at_eos: bool) -> Self {
        self.stop_at_eos = stop_at_eos;
        self
    }
}

/// Timing for one finished sample
#[derive(Debug, Clone)]
pub struct SampleStats {
    /// Sample index, starting at 0
    pub index: usize,
    pub prompt_tokens: usize,
    pub new_tokens: usize,
    pub elapsed: Duration,
}

impl SampleStats {
    pub fn tokens_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.new_tokens as f64 / secs
        } else {
            0.0
        }
    }
}

/// Composes a model and a tokenizer into prompt-in, text-out generation.
pub struct GenerationDriver {
    model: Box<dyn LanguageModel>,
    tokenizer: Box<dyn TextTokenizer>,
    config: Option<ModelConfig>,
}

impl GenerationDriver {
    pub fn new(model: Box<dyn LanguageModel>, tokenizer: Box<dyn TextTokenizer>) -> Self {
        Self {
            model,
            tokenizer,
            config: None,
        }
    }

    /// Load the model and tokenizer through `loader`
    pub fn from_checkpoint(loader: &dyn CheckpointLoader, checkpoint_dir: &Path) -> crate::Result<Self> {
        let loaded = loader.load(checkpoint_dir)?;
        Ok(Self {
            model: loaded.model,
            tokenizer: loaded.tokenizer,
            config: Some(loaded.config),
        })
    }

    /// Configuration of the loaded checkpoint, when loaded from one
    pub fn config(&self) -> Option<&ModelConfig> {
        self.config.as_ref()
    }

    pub fn model(&self) -> &dyn LanguageModel {
        self.model.as_ref()
    }

    /// Generate `num_samples` continuations, writing each decoded sample to
    /// `out` on its own line. `on_sample` runs after each sample is written.
    pub fn run<W, F>(
        &self,
        request: &SampleRequest,
        out: &mut W,
        cancel: &CancelToken,
        mut on_sample: F,
    ) -> crate::Result<Vec<String>>
    where
        W: Write + ?Sized,
        F: FnMut(&SampleStats),
    {
        if request.num_samples == 0 {
            return Err(crate::ParrotError::InvalidArgument(
                "num_samples must be at least 1".to_string(),
            ));
        }

        let prompt = self.tokenizer.encode(&request.prompt)?;
        if prompt.is_empty() {
            return Err(crate::ParrotError::InvalidArgument(
                "prompt encodes to zero tokens".to_string(),
            ));
        }

        let mut generation = request.generation.clone();
        if request.stop_at_eos {
            match self.tokenizer.eos_id() {
                Some(eos) => generation.stop_token = Some(eos),
                None => tracing::warn!("tokenizer has no end-of-sequence token; generating to the length cap"),
            }
        }

        tracing::info!(
            prompt_tokens = prompt.len(),
            num_samples = request.num_samples,
            max_new_tokens = generation.max_new_tokens,
            "Generating"
        );

        let mut samples = Vec::new();
        for index in 0..request.num_samples {
            let mut rng = match generation.seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
                None => StdRng::from_os_rng(),
            };

            let started = Instant::now();
            let tokens = generate_with_cancel(self.model.as_ref(), &prompt, &generation, &mut rng, cancel)?;
            let stats = SampleStats {
                index,
                prompt_tokens: prompt.len(),
                new_tokens: tokens.len() - prompt.len(),
                elapsed: started.elapsed(),
            };

            let text = self.tokenizer.decode(&tokens)?;
            writeln!(out, "{}", text)?;
            out.flush()?;

            tracing::info!(
                "Time for inference {}: {:.02} sec total, {:.02} tokens/sec",
                index + 1,
                stats.elapsed.as_secs_f64(),
                stats.tokens_per_sec()
            );
            on_sample(&stats);
            samples.push(text);
        }

        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::model::mock::ScriptedModel;

    /// Records calls and returns fixed ids and text
    #[derive(Default)]
    struct FakeTokenizer {
        decoded: Arc<Mutex<Vec<Vec<u32>>>>,
    }

    impl TextTokenizer for FakeTokenizer {
        fn encode(&self, text: &str) -> crate::Result<Vec<u32>> {
            Ok(if text.is_empty() { vec![] } else { vec![1, 2, 3] })
        }

        fn decode(&self, ids: &[u32]) -> crate::Result<String> {
            self.decoded.lock().unwrap().push(ids.to_vec());
            Ok("foo bar baz".to_string())
        }

        fn eos_id(&self) -> Option<u32> {
            Some(0)
        }
    }

    fn make_driver(model: ScriptedModel) -> (GenerationDriver, Arc<Mutex<Vec<Vec<u32>>>>) {
        let tokenizer = FakeTokenizer::default();
        let decoded = tokenizer.decoded.clone();
        (GenerationDriver::new(Box::new(model), Box::new(tokenizer)), decoded)
    }

    #[test]
    fn test_one_line_per_sample() {
        let (driver, decoded) = make_driver(ScriptedModel::uniform(50, 16));
        let request = SampleRequest::new(
            "Hello",
            2,
            GenerationConfig::default()
                .with_max_tokens(50)
                .with_temperature(2.0)
                .with_top_k(2)
                .with_seed(1),
        );

        let mut out = Vec::new();
        let mut seen = Vec::new();
        let samples = driver
            .run(&request, &mut out, &CancelToken::never(), |stats| seen.push(stats.index))
            .unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "foo bar baz\n".repeat(2));
        assert_eq!(samples.len(), 2);
        assert_eq!(seen, vec![0, 1]);

        let decoded = decoded.lock().unwrap();
        assert_eq!(decoded.len(), 2);
        for ids in decoded.iter() {
            assert_eq!(ids.len(), 53);
            assert_eq!(&ids[..3], &[1, 2, 3]);
        }
        // per-sample seeds differ
        assert_ne!(decoded[0], decoded[1]);
    }

    #[test]
    fn test_seeded_runs_repeat() {
        let config = GenerationConfig::default().with_max_tokens(10).with_seed(42);
        let request = SampleRequest::new("Hello", 1, config);

        let mut first = Vec::new();
        for _ in 0..2 {
            let (driver, decoded) = make_driver(ScriptedModel::uniform(50, 16));
            driver
                .run(&request, &mut std::io::sink(), &CancelToken::never(), |_| {})
                .unwrap();
            first.push(decoded.lock().unwrap()[0].clone());
        }
        assert_eq!(first[0], first[1]);
    }

    #[test]
    fn test_stop_at_eos() {
        // token 0 is forced on the second generated step
        let model = ScriptedModel::new(50, 16, |tokens, start| {
            Some(if start + tokens.len() == 4 { 0 } else { 9 })
        });
        let (driver, decoded) = make_driver(model);
        let request =
            SampleRequest::new("Hello", 1, GenerationConfig::default().with_max_tokens(20)).with_stop_at_eos(true);

        driver
            .run(&request, &mut std::io::sink(), &CancelToken::never(), |_| {})
            .unwrap();
        assert_eq!(decoded.lock().unwrap()[0], vec![1, 2, 3, 9, 0]);
    }

    #[test]
    fn test_invalid_requests() {
        let (driver, _) = make_driver(ScriptedModel::uniform(50, 16));
        let mut out = Vec::new();

        let zero = SampleRequest::new("Hello", 0, GenerationConfig::default());
        assert!(matches!(
            driver.run(&zero, &mut out, &CancelToken::never(), |_| {}),
            Err(crate::ParrotError::InvalidArgument(_))
        ));

        let empty = SampleRequest::new("", 1, GenerationConfig::default());
        assert!(matches!(
            driver.run(&empty, &mut out, &CancelToken::never(), |_| {}),
            Err(crate::ParrotError::InvalidArgument(_))
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_model_failure_aborts_without_output() {
        let (driver, _) = make_driver(ScriptedModel::uniform(50, 16).failing_on(0));
        let request = SampleRequest::new("Hello", 3, GenerationConfig::default());
        let mut out = Vec::new();
        assert!(matches!(
            driver.run(&request, &mut out, &CancelToken::never(), |_| {}),
            Err(crate::ParrotError::ModelExecution(_))
        ));
        assert!(out.is_empty());
    }
}
