//! Model interface and the Parrot (GPT-NeoX style) implementation.

mod base;
#[cfg(test)]
pub(crate) mod mock;
mod parrot;

pub use base::LanguageModel;
pub use parrot::ParrotModel;
