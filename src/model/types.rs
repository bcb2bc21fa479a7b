use serde::{Deserialize, Serialize};

/// Decoding parameters shared by every generation call in the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    /// `0.0` (or `do_sample = false`) selects greedy decoding.
    pub temperature: f64,
    pub top_k: usize,
    pub top_p: f64,
    pub do_sample: bool,
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            temperature: 0.7,
            top_k: 50,
            top_p: 0.95,
            do_sample: true,
            seed: None,
        }
    }
}

impl GenerationConfig {
    pub fn is_greedy(&self) -> bool {
        !self.do_sample || self.temperature <= 0.0
    }

    /// Applies the optional per-request overrides on top of `self`.
    pub fn merged_with(&self, request: &GenerationRequest) -> GenerationConfig {
        GenerationConfig {
            max_new_tokens: request.max_new_tokens.unwrap_or(self.max_new_tokens),
            temperature: request.temperature.unwrap_or(self.temperature),
            top_k: request.top_k.unwrap_or(self.top_k),
            top_p: request.top_p.unwrap_or(self.top_p),
            do_sample: self.do_sample,
            seed: request.seed.or(self.seed),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    /// Natural-language description of the hardware to generate.
    #[serde(alias = "description", alias = "prompt")]
    pub instruction: String,
    pub max_new_tokens: Option<usize>,
    pub temperature: Option<f64>,
    pub top_k: Option<usize>,
    pub top_p: Option<f64>,
    pub seed: Option<u64>,
}

impl GenerationRequest {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            max_new_tokens: None,
            temperature: None,
            top_k: None,
            top_p: None,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    EndOfSequence,
    MaxTokens,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationResponse {
    pub prompt: String,
    pub completion: String,
    /// Prompt and completion decoded together, special tokens skipped.
    pub text: String,
    pub tokens_generated: usize,
    pub finish_reason: FinishReason,
    pub total_time_ms: u128,
    pub tokens_per_second: f64,
    pub model: ModelMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelMetadata {
    pub name: String,
    pub source: String,
    pub quantized: bool,
    pub dtype: String,
    pub device: String,
    pub size_bytes: u64,
}
