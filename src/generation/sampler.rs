//! Temperature and top-k token sampling.

use rand::Rng;

/// Token sampler with temperature scaling and optional top-k masking.
///
/// The random source is supplied per call, so a seeded RNG reproduces the
/// same draws.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampler {
    temperature: f32,
    top_k: Option<usize>,
}

impl Sampler {
    /// Create a sampler, validating its parameters
    pub fn new(temperature: f32, top_k: Option<usize>) -> crate::Result<Self> {
        if !(temperature.is_finite() && temperature > 0.0) {
            return Err(crate::ParrotError::InvalidArgument(format!(
                "temperature must be a positive number, got {}",
                temperature
            )));
        }

        if top_k == Some(0) {
            return Err(crate::ParrotError::InvalidArgument(
                "top_k must be positive when provided".to_string(),
            ));
        }

        Ok(Self { temperature, top_k })
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn top_k(&self) -> Option<usize> {
        self.top_k
    }

    /// Sample a token id from one position's raw scores
    pub fn sample<R: Rng + ?Sized>(&self, scores: &[f32], rng: &mut R) -> crate::Result<u32> {
        if scores.is_empty() {
            return Err(crate::ParrotError::InvalidArgument("empty score vector".to_string()));
        }

        let mut logits = match self.top_k {
            Some(k) if k < scores.len() => top_k_filter(scores, k),
            _ => scores.to_vec(),
        };

        // Shift before scaling so a tiny temperature cannot overflow the top score
        let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if !max_logit.is_finite() {
            return Err(crate::ParrotError::InvalidArgument(
                "scores contain no finite candidate".to_string(),
            ));
        }
        for logit in logits.iter_mut() {
            *logit = (*logit - max_logit) / self.temperature;
        }

        let probs = softmax(&logits);
        if probs.iter().any(|p| p.is_nan()) {
            return Err(crate::ParrotError::InvalidArgument(
                "scores contain no finite candidate".to_string(),
            ));
        }

        Ok(sample_from_probs(&probs, rng))
    }
}

/// Sample a token id with the given temperature and top-k.
///
/// Fails with `InvalidArgument` on `temperature <= 0` or `top_k == Some(0)`.
pub fn sample<R: Rng + ?Sized>(
    scores: &[f32],
    temperature: f32,
    top_k: Option<usize>,
    rng: &mut R,
) -> crate::Result<u32> {
    Sampler::new(temperature, top_k)?.sample(scores, rng)
}

/// Numerically stable softmax. Entries at `-inf` get probability 0.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp_logits: Vec<f32> = logits.iter().map(|&x| (x - max_logit).exp()).collect();
    let sum: f32 = exp_logits.iter().sum();
    exp_logits.iter().map(|&x| x / sum).collect()
}

/// Mask every score strictly below the k-th largest with `-inf`.
///
/// Scores tied with the threshold survive, so more than `k` entries may remain.
fn top_k_filter(scores: &[f32], k: usize) -> Vec<f32> {
    let mut sorted = scores.to_vec();
    let (_, threshold, _) = sorted.select_nth_unstable_by(k - 1, |a, b| b.total_cmp(a));
    let threshold = *threshold;

    scores
        .iter()
        .map(|&v| if v >= threshold { v } else { f32::NEG_INFINITY })
        .collect()
}

/// Draw an index from a categorical distribution
fn sample_from_probs<R: Rng + ?Sized>(probs: &[f32], rng: &mut R) -> u32 {
    let sample: f64 = rng.random();

    let mut cumsum = 0.0f64;
    for (idx, &prob) in probs.iter().enumerate() {
        cumsum += prob as f64;
        if sample < cumsum {
            return idx as u32;
        }
    }

    // Rounding left the total just under `sample`; take the last candidate
    // with non-zero mass so masked entries are never returned.
    probs
        .iter()
        .rposition(|&p| p > 0.0)
        .unwrap_or(probs.len() - 1) as u32
}
