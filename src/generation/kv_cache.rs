//! Rotating key-value cache for incremental generation.

use std::ops::Range;

use candle_core::Tensor;

/// Cached key and value for one sequence position in one layer.
#[derive(Debug, Clone)]
struct CacheEntry {
    position: usize,
    key: Tensor,
    value: Tensor,
}

/// Fixed-capacity cache of per-layer keys and values.
///
/// Each layer owns `capacity` slots and position `p` lives in slot
/// `p % capacity`. Writing position `p + capacity` therefore evicts `p`,
/// which is exactly the position that leaves a sliding window of width
/// `capacity`. The arena never grows.
#[derive(Debug, Clone)]
pub struct KvCache {
    /// Slots per layer, indexed by `position % capacity`
    layers: Vec<Vec<Option<CacheEntry>>>,
    /// Number of slots per layer (the model's context window)
    capacity: usize,
}

impl KvCache {
    /// Create an empty cache with `capacity` slots for each of `num_layers` layers
    pub fn new(capacity: usize, num_layers: usize) -> Self {
        let layers = (0..num_layers)
            .map(|_| (0..capacity).map(|_| None).collect())
            .collect();

        Self { layers, capacity }
    }

    /// Slots per layer
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of layers
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    fn slot(&self, position: usize) -> usize {
        position % self.capacity
    }

    fn layer(&self, layer_idx: usize) -> crate::Result<&[Option<CacheEntry>]> {
        self.layers
            .get(layer_idx)
            .map(Vec::as_slice)
            .ok_or_else(|| crate::ParrotError::model(format!("cache has no layer {}", layer_idx)))
    }

    /// Store the key and value of one position, evicting the slot's previous occupant.
    ///
    /// `key` and `value` are `[n_head, 1, head_size]`.
    pub fn insert(
        &mut self,
        layer_idx: usize,
        position: usize,
        key: Tensor,
        value: Tensor,
    ) -> crate::Result<()> {
        if self.capacity == 0 {
            return Err(crate::ParrotError::model("cache has zero capacity"));
        }

        let slot = self.slot(position);
        let layer = self
            .layers
            .get_mut(layer_idx)
            .ok_or_else(|| crate::ParrotError::model(format!("cache has no layer {}", layer_idx)))?;

        if let Some(previous) = &layer[slot] {
            if previous.position > position {
                return Err(crate::ParrotError::model(format!(
                    "position {} would overwrite newer position {}",
                    position, previous.position
                )));
            }
            if previous.position != position {
                tracing::trace!(layer_idx, evicted = previous.position, position, "cache slot reused");
            }
        }

        layer[slot] = Some(CacheEntry { position, key, value });
        Ok(())
    }

    /// Whether `position` is currently held by `layer_idx`
    pub fn contains(&self, layer_idx: usize, position: usize) -> bool {
        if self.capacity == 0 {
            return false;
        }
        self.layer(layer_idx)
            .ok()
            .and_then(|slots| slots[self.slot(position)].as_ref())
            .is_some_and(|entry| entry.position == position)
    }

    /// Keys and values for `positions`, concatenated in position order.
    ///
    /// Returns `[n_head, len, head_size]` tensors. Fails if any position was
    /// evicted or never written.
    pub fn gather(&self, layer_idx: usize, positions: Range<usize>) -> crate::Result<(Tensor, Tensor)> {
        if positions.is_empty() {
            return Err(crate::ParrotError::model("cannot gather an empty position range"));
        }
        if positions.len() > self.capacity {
            return Err(crate::ParrotError::model(format!(
                "range of {} positions exceeds cache capacity {}",
                positions.len(),
                self.capacity
            )));
        }

        let slots = self.layer(layer_idx)?;
        let mut keys = Vec::with_capacity(positions.len());
        let mut values = Vec::with_capacity(positions.len());

        for position in positions {
            match &slots[self.slot(position)] {
                Some(entry) if entry.position == position => {
                    keys.push(&entry.key);
                    values.push(&entry.value);
                }
                _ => {
                    return Err(crate::ParrotError::model(format!(
                        "cache miss for layer {} at position {}",
                        layer_idx, position
                    )));
                }
            }
        }

        Ok((Tensor::cat(&keys, 1)?, Tensor::cat(&values, 1)?))
    }

    /// Drop every cached entry
    pub fn clear(&mut self) {
        for layer in self.layers.iter_mut() {
            for slot in layer.iter_mut() {
                *slot = None;
            }
        }
    }

    /// Get memory usage in bytes
    pub fn memory_usage(&self) -> usize {
        self.layers
            .iter()
            .flatten()
            .flatten()
            .map(|entry| {
                entry.key.elem_count() * entry.key.dtype().size_in_bytes()
                    + entry.value.elem_count() * entry.value.dtype().size_in_bytes()
            })
            .sum()
    }
}
