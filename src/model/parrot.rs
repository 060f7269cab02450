//! Parrot (GPT-NeoX style) decoder with incremental, windowed attention.

use std::ops::Range;

use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{embedding, layer_norm, linear_b, linear_no_bias, Embedding, LayerNorm, Linear, VarBuilder};

use super::base::LanguageModel;
use crate::config::ModelConfig;
use crate::generation::KvCache;

/// Rotary position embedding over the leading `n_elem` dims of each head.
///
/// Angles are computed from absolute positions on demand, so there is no
/// upper bound on the position index.
#[derive(Debug, Clone)]
struct RotaryEmbedding {
    n_elem: usize,
    inv_freq: Vec<f64>,
}

impl RotaryEmbedding {
    fn new(n_elem: usize, base: f64) -> Self {
        let inv_freq = (0..n_elem)
            .step_by(2)
            .map(|i| 1.0 / base.powf(i as f64 / n_elem as f64))
            .collect();
        Self { n_elem, inv_freq }
    }

    /// `cos` and `sin` tables of shape `[len, n_elem]` for `positions`
    fn tables(&self, positions: Range<usize>, device: &Device, dtype: DType) -> crate::Result<(Tensor, Tensor)> {
        let len = positions.len();
        let mut cos = Vec::with_capacity(len * self.n_elem);
        let mut sin = Vec::with_capacity(len * self.n_elem);

        for position in positions {
            let angles: Vec<f64> = self.inv_freq.iter().map(|f| position as f64 * f).collect();
            // rotate-half layout: the half-size table is repeated twice
            for _ in 0..2 {
                cos.extend(angles.iter().map(|a| a.cos() as f32));
                sin.extend(angles.iter().map(|a| a.sin() as f32));
            }
        }

        let cos = Tensor::from_vec(cos, (len, self.n_elem), device)?.to_dtype(dtype)?;
        let sin = Tensor::from_vec(sin, (len, self.n_elem), device)?.to_dtype(dtype)?;
        Ok((cos, sin))
    }

    /// Rotate `x` of shape `[n_head, len, head_size]`
    fn apply(&self, x: &Tensor, cos: &Tensor, sin: &Tensor) -> crate::Result<Tensor> {
        if self.n_elem == 0 {
            return Ok(x.clone());
        }

        let head_size = x.dim(D::Minus1)?;
        let half = self.n_elem / 2;

        let x_rope = x.narrow(D::Minus1, 0, self.n_elem)?;
        let x1 = x_rope.narrow(D::Minus1, 0, half)?;
        let x2 = x_rope.narrow(D::Minus1, half, half)?;
        let rotated = Tensor::cat(&[&x2.neg()?, &x1], D::Minus1)?;
        let roped = (x_rope.broadcast_mul(cos)? + rotated.broadcast_mul(sin)?)?;

        if self.n_elem == head_size {
            return Ok(roped);
        }

        let x_pass = x.narrow(D::Minus1, self.n_elem, head_size - self.n_elem)?;
        Ok(Tensor::cat(&[&roped, &x_pass], D::Minus1)?)
    }
}

/// Additive attention mask of shape `[new, keys]`.
///
/// Query position `p` may see key position `k` when `p - block_size < k <= p`.
fn window_mask(
    queries: Range<usize>,
    keys: Range<usize>,
    block_size: usize,
    device: &Device,
    dtype: DType,
) -> crate::Result<Tensor> {
    let (rows, cols) = (queries.len(), keys.len());
    let mut data = Vec::with_capacity(rows * cols);
    for p in queries {
        for k in keys.clone() {
            let visible = k <= p && k + block_size > p;
            data.push(if visible { 0.0f32 } else { f32::NEG_INFINITY });
        }
    }
    Ok(Tensor::from_vec(data, (rows, cols), device)?.to_dtype(dtype)?)
}

struct CausalSelfAttention {
    attn: Linear,
    proj: Linear,
    n_head: usize,
    head_size: usize,
    block_size: usize,
}

impl CausalSelfAttention {
    fn new(config: &ModelConfig, vb: VarBuilder) -> crate::Result<Self> {
        let n_embd = config.n_embd;
        Ok(Self {
            attn: linear_b(n_embd, 3 * n_embd, config.bias, vb.pp("attn"))?,
            proj: linear_b(n_embd, n_embd, config.bias, vb.pp("proj"))?,
            n_head: config.n_head,
            head_size: config.head_size(),
            block_size: config.block_size,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn forward(
        &self,
        x: &Tensor,
        layer_idx: usize,
        start_position: usize,
        rope: &RotaryEmbedding,
        cos: &Tensor,
        sin: &Tensor,
        mask: &Tensor,
        cache: &mut KvCache,
    ) -> crate::Result<Tensor> {
        let (len, n_embd) = x.dims2()?;
        let hs = self.head_size;

        // fused projection, laid out per head as [q | k | v]
        let qkv = self
            .attn
            .forward(x)?
            .reshape((len, self.n_head, 3 * hs))?
            .transpose(0, 1)?;
        let q = qkv.narrow(D::Minus1, 0, hs)?.contiguous()?;
        let k = qkv.narrow(D::Minus1, hs, hs)?.contiguous()?;
        let v = qkv.narrow(D::Minus1, 2 * hs, hs)?.contiguous()?;

        let q = rope.apply(&q, cos, sin)?;
        let k = rope.apply(&k, cos, sin)?;

        for i in 0..len {
            cache.insert(
                layer_idx,
                start_position + i,
                k.narrow(1, i, 1)?.contiguous()?,
                v.narrow(1, i, 1)?.contiguous()?,
            )?;
        }

        let end = start_position + len;
        let (keys, values) = cache.gather(layer_idx, end.saturating_sub(self.block_size)..end)?;

        let scale = 1.0 / (hs as f64).sqrt();
        let att = (q.matmul(&keys.t()?)? * scale)?;
        let att = att.broadcast_add(mask)?;
        let att = candle_nn::ops::softmax_last_dim(&att)?;
        let y = att.matmul(&values)?;

        let y = y.transpose(0, 1)?.reshape((len, n_embd))?;
        Ok(self.proj.forward(&y)?)
    }
}

struct Mlp {
    fc: Linear,
    proj: Linear,
}

impl Mlp {
    fn new(config: &ModelConfig, vb: VarBuilder) -> crate::Result<Self> {
        let n_embd = config.n_embd;
        Ok(Self {
            fc: linear_b(n_embd, 4 * n_embd, config.bias, vb.pp("fc"))?,
            proj: linear_b(4 * n_embd, n_embd, config.bias, vb.pp("proj"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> crate::Result<Tensor> {
        let x = self.fc.forward(x)?.gelu_erf()?;
        Ok(self.proj.forward(&x)?)
    }
}

struct Block {
    norm_1: LayerNorm,
    attn: CausalSelfAttention,
    norm_2: LayerNorm,
    mlp: Mlp,
    parallel_residual: bool,
}

impl Block {
    fn new(config: &ModelConfig, vb: VarBuilder) -> crate::Result<Self> {
        Ok(Self {
            norm_1: layer_norm(config.n_embd, config.norm_eps, vb.pp("norm_1"))?,
            attn: CausalSelfAttention::new(config, vb.pp("attn"))?,
            norm_2: layer_norm(config.n_embd, config.norm_eps, vb.pp("norm_2"))?,
            mlp: Mlp::new(config, vb.pp("mlp"))?,
            parallel_residual: config.parallel_residual,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn forward(
        &self,
        x: &Tensor,
        layer_idx: usize,
        start_position: usize,
        rope: &RotaryEmbedding,
        cos: &Tensor,
        sin: &Tensor,
        mask: &Tensor,
        cache: &mut KvCache,
    ) -> crate::Result<Tensor> {
        let normed = self.norm_1.forward(x)?;
        let h = self
            .attn
            .forward(&normed, layer_idx, start_position, rope, cos, sin, mask, cache)?;

        if self.parallel_residual {
            let m = self.mlp.forward(&self.norm_2.forward(x)?)?;
            Ok(((x + h)? + m)?)
        } else {
            let x = (x + h)?;
            let m = self.mlp.forward(&self.norm_2.forward(&x)?)?;
            Ok((x + m)?)
        }
    }
}

/// GPT-NeoX style language model.
pub struct ParrotModel {
    wte: Embedding,
    blocks: Vec<Block>,
    ln_f: LayerNorm,
    lm_head: Linear,
    rope: RotaryEmbedding,
    config: ModelConfig,
    device: Device,
    dtype: DType,
}

impl ParrotModel {
    /// Build the model from weights named as in a Parrot checkpoint
    /// (`transformer.wte`, `transformer.h.{i}.*`, `transformer.ln_f`, `lm_head`).
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> crate::Result<Self> {
        config.validate()?;

        let vocab = config.padded_vocab_size();
        let wte = embedding(vocab, config.n_embd, vb.pp("transformer.wte"))?;
        let blocks = (0..config.n_layer)
            .map(|i| Block::new(config, vb.pp(format!("transformer.h.{}", i))))
            .collect::<crate::Result<Vec<_>>>()?;
        let ln_f = layer_norm(config.n_embd, config.norm_eps, vb.pp("transformer.ln_f"))?;
        let lm_head = linear_no_bias(config.n_embd, vocab, vb.pp("lm_head"))?;

        tracing::debug!(
            n_layer = config.n_layer,
            n_head = config.n_head,
            n_embd = config.n_embd,
            vocab,
            "built parrot model"
        );

        Ok(Self {
            wte,
            blocks,
            ln_f,
            lm_head,
            rope: RotaryEmbedding::new(config.rope_n_elem(), 10_000.0),
            config: config.clone(),
            device: vb.device().clone(),
            dtype: vb.dtype(),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }
}

impl LanguageModel for ParrotModel {
    fn vocab_size(&self) -> usize {
        self.config.padded_vocab_size()
    }

    fn block_size(&self) -> usize {
        self.config.block_size
    }

    fn num_layers(&self) -> usize {
        self.config.n_layer
    }

    fn forward(&self, tokens: &[u32], start_position: usize, cache: &mut KvCache) -> crate::Result<Tensor> {
        let len = tokens.len();
        if len == 0 || len > self.config.block_size {
            return Err(crate::ParrotError::model(format!(
                "forward expects 1..={} tokens, got {}",
                self.config.block_size, len
            )));
        }

        let queries = start_position..start_position + len;
        let keys = queries.end.saturating_sub(self.config.block_size)..queries.end;

        let (cos, sin) = self.rope.tables(queries.clone(), &self.device, self.dtype)?;
        let mask = window_mask(queries, keys, self.config.block_size, &self.device, self.dtype)?;

        let input = Tensor::new(tokens, &self.device)?;
        let mut x = self.wte.forward(&input)?;

        for (layer_idx, block) in self.blocks.iter().enumerate() {
            x = block.forward(&x, layer_idx, start_position, &self.rope, &cos, &sin, &mask, cache)?;
        }

        let x = self.ln_f.forward(&x)?;
        Ok(self.lm_head.forward(&x)?.to_dtype(DType::F32)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{generate, GenerationConfig};
    use candle_nn::VarMap;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tiny_model(block_size: usize, vocab_size: usize, n_layer: usize) -> ParrotModel {
        let config = ModelConfig {
            n_layer,
            ..ModelConfig::tiny(block_size, vocab_size)
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        ParrotModel::new(&config, vb).unwrap()
    }

    fn last_row(scores: &Tensor) -> Vec<f32> {
        let rows = scores.dim(0).unwrap();
        scores.get(rows - 1).unwrap().to_vec1().unwrap()
    }

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-4, "{} vs {}", x, y);
        }
    }

    #[test]
    fn test_rope_identity_at_position_zero() {
        let rope = RotaryEmbedding::new(2, 10_000.0);
        let (cos, sin) = rope.tables(0..1, &Device::Cpu, DType::F32).unwrap();
        let x = Tensor::new(&[[[1.0f32, 2.0, 3.0]]], &Device::Cpu).unwrap();
        let y: Vec<f32> = rope.apply(&x, &cos, &sin).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert_close(&y, &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_window_mask() {
        let mask = window_mask(3..5, 2..5, 3, &Device::Cpu, DType::F32).unwrap();
        let rows: Vec<Vec<f32>> = mask.to_vec2().unwrap();
        assert_eq!(rows[0], vec![0.0, 0.0, f32::NEG_INFINITY]);
        assert_eq!(rows[1], vec![0.0, 0.0, 0.0]);

        let mask = window_mask(5..6, 2..6, 3, &Device::Cpu, DType::F32).unwrap();
        let rows: Vec<Vec<f32>> = mask.to_vec2().unwrap();
        assert_eq!(rows[0], vec![f32::NEG_INFINITY, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_forward_shape() {
        let model = tiny_model(8, 16, 2);
        let mut cache = model.new_cache();
        let scores = model.forward(&[1, 2, 3], 0, &mut cache).unwrap();
        assert_eq!(scores.dims(), &[3, 16]);
        assert!(cache.contains(1, 2));
    }

    #[test]
    fn test_incremental_matches_full_forward() {
        let model = tiny_model(8, 16, 2);
        let tokens = [4u32, 8, 15, 11, 2, 9];

        let mut full_cache = model.new_cache();
        let full = model.forward(&tokens, 0, &mut full_cache).unwrap();

        let mut cache = model.new_cache();
        model.forward(&tokens[..4], 0, &mut cache).unwrap();
        model.forward(&tokens[4..5], 4, &mut cache).unwrap();
        let step = model.forward(&tokens[5..], 5, &mut cache).unwrap();

        assert_close(&last_row(&full), &last_row(&step));
    }

    #[test]
    fn test_rejects_oversized_forward() {
        let model = tiny_model(4, 16, 1);
        let mut cache = model.new_cache();
        assert!(matches!(
            model.forward(&[1, 2, 3, 4, 5], 0, &mut cache),
            Err(crate::ParrotError::ModelExecution(_))
        ));
        assert!(model.forward(&[], 0, &mut cache).is_err());
    }

    #[test]
    fn test_generate_lengths() {
        let model = tiny_model(128, 16, 1);
        let prompt = [3u32, 7, 1, 0, 12];

        for (max_seq_length, expected) in [(10, 10), (9999, 25)] {
            let config = GenerationConfig::default()
                .with_max_tokens(20)
                .with_max_seq_length(max_seq_length)
                .with_top_k(4);
            let mut rng = StdRng::seed_from_u64(0);
            let out = generate(&model, &prompt, &config, &mut rng).unwrap();
            assert_eq!(out.len(), expected);
            assert_eq!(&out[..5], &prompt);
            assert!(out.iter().all(|&t| t < 16));
        }
    }

    #[test]
    fn test_generate_beyond_block_size() {
        let model = tiny_model(4, 16, 2);
        let config = GenerationConfig::default().with_max_tokens(12);
        let mut rng = StdRng::seed_from_u64(2);
        let out = generate(&model, &[1, 2, 3], &config, &mut rng).unwrap();
        assert_eq!(out.len(), 15);
    }

    #[test]
    fn test_tiny_temperature_is_greedy() {
        let model = tiny_model(16, 16, 2);
        let prompt = [3u32, 7, 1];
        let config = GenerationConfig::default()
            .with_max_tokens(8)
            .with_temperature(1e-40);

        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            generate(&model, &prompt, &config, &mut rng).unwrap()
        };
        let out = run(0);
        assert_eq!(out.len(), 11);
        assert_eq!(out, run(99));
    }

    #[test]
    fn test_positions_outside_window_have_no_effect() {
        let model = tiny_model(4, 16, 1);
        let config = GenerationConfig::default().with_max_tokens(10).with_temperature(0.9);

        let run = |prompt: &[u32]| {
            let mut rng = StdRng::seed_from_u64(17);
            generate(&model, prompt, &config, &mut rng).unwrap()
        };

        let a = run(&[0, 1, 5, 6, 7, 8]);
        let b = run(&[9, 3, 5, 6, 7, 8]);
        assert_eq!(a[6..], b[6..]);
    }

    #[test]
    fn test_seeded_generation_is_deterministic() {
        let model = tiny_model(16, 16, 2);
        let config = GenerationConfig::default().with_max_tokens(8).with_top_k(4);
        let run = || {
            let mut rng = StdRng::seed_from_u64(3);
            generate(&model, &[1, 2], &config, &mut rng).unwrap()
        };
        assert_eq!(run(), run());
    }
}
