//! The autoregressive decoding loop.

use candle_core::{DType, Tensor};
use rand::Rng;

use super::{CancelToken, GenerationConfig, Sampler, SequenceBuffer};
use crate::model::LanguageModel;

/// Generate a continuation of `prompt`.
///
/// Returns the prompt followed by the sampled tokens. The output holds at
/// most `min(T + max_new_tokens, max_seq_length)` tokens and ends early,
/// stop token included, when `stop_token` is sampled.
pub fn generate<M, R>(
    model: &M,
    prompt: &[u32],
    config: &GenerationConfig,
    rng: &mut R,
) -> crate::Result<Vec<u32>>
where
    M: LanguageModel + ?Sized,
    R: Rng + ?Sized,
{
    generate_with_cancel(model, prompt, config, rng, &CancelToken::never())
}

/// [`generate`] with a cancellation token checked before every step.
pub fn generate_with_cancel<M, R>(
    model: &M,
    prompt: &[u32],
    config: &GenerationConfig,
    rng: &mut R,
    cancel: &CancelToken,
) -> crate::Result<Vec<u32>>
where
    M: LanguageModel + ?Sized,
    R: Rng + ?Sized,
{
    let sampler = Sampler::new(config.temperature, config.top_k)?;
    let capacity = config.length_cap(prompt.len())?;
    let vocab_size = model.vocab_size();
    let context = model.block_size();

    if context == 0 {
        return Err(crate::ParrotError::InvalidArgument(
            "model block_size must be positive".to_string(),
        ));
    }
    if let Some(&token) = prompt.iter().find(|&&token| token as usize >= vocab_size) {
        return Err(crate::ParrotError::InvalidArgument(format!(
            "prompt token {} is outside the vocabulary of {}",
            token, vocab_size
        )));
    }

    let mut buffer = SequenceBuffer::new(prompt, capacity, model.new_cache())?;

    tracing::debug!(
        prompt_len = prompt.len(),
        capacity,
        context,
        temperature = config.temperature,
        top_k = ?config.top_k,
        "starting generation"
    );

    while !buffer.is_full() {
        cancel.check()?;

        let pending = buffer.pending(context);
        let (tokens, cache) = buffer.split_mut();
        let scores = model.forward(&tokens[pending.clone()], pending.start, cache)?;
        buffer.mark_scored(pending.end);

        let last = last_position_scores(&scores, pending.len(), vocab_size)?;
        let token = sampler.sample(&last, rng)?;

        match buffer.append(token) {
            Ok(()) => {}
            Err(crate::ParrotError::CapacityExceeded { .. }) => break,
            Err(e) => return Err(e),
        }

        if config.stop_token == Some(token) {
            tracing::debug!(token, len = buffer.len(), "stop token sampled");
            break;
        }
    }

    tracing::debug!(
        prompt_len = buffer.prompt().len(),
        generated = buffer.generated().len(),
        capacity = buffer.capacity(),
        "generation finished"
    );
    Ok(buffer.into_tokens())
}

/// Score row of the final position, checked against the expected shape
fn last_position_scores(scores: &Tensor, rows: usize, vocab_size: usize) -> crate::Result<Vec<f32>> {
    let (got_rows, got_cols) = scores.dims2()?;
    if got_rows != rows || got_cols != vocab_size {
        return Err(crate::ParrotError::model(format!(
            "expected scores of shape [{}, {}], got [{}, {}]",
            rows, vocab_size, got_rows, got_cols
        )));
    }

    Ok(scores.get(rows - 1)?.to_dtype(DType::F32)?.to_vec1::<f32>()?)
}
