//! Text generation: sampling, sequence buffer, rotating cache and the decoding loop.

mod buffer;
mod cancel;
mod config;
mod generate;
mod kv_cache;
mod sampler;

pub use buffer::SequenceBuffer;
pub use cancel::CancelToken;
pub use config::GenerationConfig;
pub use generate::{generate, generate_with_cancel};
pub use kv_cache::KvCache;
pub use sampler::{sample, softmax, Sampler};
