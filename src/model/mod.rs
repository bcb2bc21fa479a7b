mod codec;
mod generator;
mod loader;
mod options;
mod registry;
pub mod sampling;
pub mod streaming;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use codec::TextCodec;
pub use generator::{CausalLm, Generator};
pub use loader::{ModelArtifacts, ModelSource, TOKENIZER_FILE, TokenizerSource, load_tokenizer};
pub use options::{DeviceSpec, LoadOptions, Precision, QuantizationMode};
pub use registry::ModelRegistry;
pub use types::{
    FinishReason, GenerationConfig, GenerationRequest, GenerationResponse, ModelMetadata,
};
