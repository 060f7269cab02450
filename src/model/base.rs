//! Capability trait consumed by the generation loop.

use candle_core::Tensor;

use crate::generation::KvCache;

/// An autoregressive language model that can be driven incrementally.
///
/// `forward` scores only the positions in `tokens` (which start at
/// `start_position`), reading keys and values for earlier positions from
/// `cache` and writing entries for the new ones. Implementations must not
/// attend to positions older than `block_size` before the newest one.
pub trait LanguageModel: Send + Sync {
    /// Length of each score row
    fn vocab_size(&self) -> usize;

    /// Maximum context length (the sliding window width)
    fn block_size(&self) -> usize;

    /// Number of cached layers
    fn num_layers(&self) -> usize;

    /// Score the new positions.
    ///
    /// Returns an `f32` tensor of shape `[tokens.len(), vocab_size]`.
    fn forward(&self, tokens: &[u32], start_position: usize, cache: &mut KvCache) -> crate::Result<Tensor>;

    /// An empty cache sized for this model
    fn new_cache(&self) -> KvCache {
        KvCache::new(self.block_size(), self.num_layers())
    }
}
