//! Lightweight models for exercising the generation loop in tests.

use std::sync::Mutex;

use candle_core::{Device, Tensor};

use super::LanguageModel;
use crate::generation::KvCache;

/// One recorded `forward` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardCall {
    pub tokens: Vec<u32>,
    pub start_position: usize,
}

type Script = Box<dyn Fn(&[u32], usize) -> Option<u32> + Send + Sync>;

/// Model whose scores come from a closure over the tokens it is shown.
///
/// The closure receives the new tokens and their start position and returns
/// the token to force (all other scores are `-inf`), or `None` for uniform
/// scores. Every call is recorded.
pub struct ScriptedModel {
    vocab_size: usize,
    block_size: usize,
    script: Script,
    fail_on_call: Option<usize>,
    pub calls: Mutex<Vec<ForwardCall>>,
}

impl ScriptedModel {
    pub fn new(
        vocab_size: usize,
        block_size: usize,
        script: impl Fn(&[u32], usize) -> Option<u32> + Send + Sync + 'static,
    ) -> Self {
        Self {
            vocab_size,
            block_size,
            script: Box::new(script),
            fail_on_call: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Uniform scores on every step
    pub fn uniform(vocab_size: usize, block_size: usize) -> Self {
        Self::new(vocab_size, block_size, |_, _| None)
    }

    /// Fail with a model error on the `n`-th call (0-based)
    pub fn failing_on(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    pub fn calls(&self) -> Vec<ForwardCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl LanguageModel for ScriptedModel {
    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn num_layers(&self) -> usize {
        0
    }

    fn forward(&self, tokens: &[u32], start_position: usize, _cache: &mut KvCache) -> crate::Result<Tensor> {
        let mut calls = self.calls.lock().unwrap();
        if self.fail_on_call == Some(calls.len()) {
            return Err(crate::ParrotError::model("out of memory"));
        }
        calls.push(ForwardCall {
            tokens: tokens.to_vec(),
            start_position,
        });

        let row = match (self.script)(tokens, start_position) {
            Some(forced) => (0..self.vocab_size)
                .map(|i| if i == forced as usize { 0.0 } else { f32::NEG_INFINITY })
                .collect(),
            None => vec![0.0f32; self.vocab_size],
        };

        let data: Vec<f32> = row.iter().copied().cycle().take(row.len() * tokens.len()).collect();
        Ok(Tensor::from_vec(data, (tokens.len(), self.vocab_size), &Device::Cpu)?)
    }
}
