//! Token buffer for one generation call.

use std::ops::Range;

use super::KvCache;

/// The growing sequence (prompt + generated tokens) and its compute cache.
///
/// The prompt occupies the first `prompt_len` positions and is never
/// modified. Capacity is fixed at construction.
#[derive(Debug)]
pub struct SequenceBuffer {
    tokens: Vec<u32>,
    prompt_len: usize,
    capacity: usize,
    /// Positions `< scored` have been run through the model
    scored: usize,
    cache: KvCache,
}

// Never empty: construction requires a non-empty prompt
#[allow(clippy::len_without_is_empty)]
impl SequenceBuffer {
    /// Create a buffer holding `prompt`, able to grow to `capacity` tokens
    pub fn new(prompt: &[u32], capacity: usize, cache: KvCache) -> crate::Result<Self> {
        if prompt.is_empty() {
            return Err(crate::ParrotError::InvalidArgument(
                "prompt must contain at least one token".to_string(),
            ));
        }
        if capacity < prompt.len() {
            return Err(crate::ParrotError::InvalidArgument(format!(
                "capacity ({}) is smaller than the prompt ({} tokens)",
                capacity,
                prompt.len()
            )));
        }

        // The cap can be far larger than any run that stops early, so only
        // one window past the prompt is reserved up front
        let reserve = capacity.min(prompt.len().saturating_add(cache.capacity()));
        let mut tokens = Vec::with_capacity(reserve);
        tokens.extend_from_slice(prompt);

        Ok(Self {
            tokens,
            prompt_len: prompt.len(),
            capacity,
            scored: 0,
            cache,
        })
    }

    /// Add one token at the next free position
    pub fn append(&mut self, token_id: u32) -> crate::Result<()> {
        if self.is_full() {
            return Err(crate::ParrotError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.tokens.push(token_id);
        Ok(())
    }

    /// Positions the next forward pass attends to.
    ///
    /// The full history while it fits in `context`, otherwise only the most
    /// recent `context` positions.
    pub fn window_for_step(current_length: usize, context: usize) -> Range<usize> {
        current_length.saturating_sub(context)..current_length
    }

    /// Positions of the current window that have not been scored yet
    pub fn pending(&self, context: usize) -> Range<usize> {
        let window = Self::window_for_step(self.len(), context);
        self.scored.max(window.start)..window.end
    }

    /// Record that every position below `end` has been scored
    pub fn mark_scored(&mut self, end: usize) {
        self.scored = end.min(self.len());
    }

    pub fn prompt(&self) -> &[u32] {
        &self.tokens[..self.prompt_len]
    }

    /// Tokens sampled so far, in generation order
    pub fn generated(&self) -> &[u32] {
        &self.tokens[self.prompt_len..]
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.tokens.len() >= self.capacity
    }

    /// Tokens and cache, borrowed together for a forward pass
    pub fn split_mut(&mut self) -> (&[u32], &mut KvCache) {
        (&self.tokens, &mut self.cache)
    }

    pub fn into_tokens(self) -> Vec<u32> {
        self.tokens
    }
}
