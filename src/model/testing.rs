//! In-process stand-ins for a tokenizer and a language model.

use crate::{
    error::ServiceError,
    model::{CausalLm, ModelMetadata, TextCodec},
};

pub(crate) const BYTE_EOS: u32 = 256;

/// One token per byte, plus an end-of-sequence id.
#[derive(Default)]
pub(crate) struct ByteCodec;

impl TextCodec for ByteCodec {
    fn encode(&self, text: &str, _add_special_tokens: bool) -> Result<Vec<u32>, ServiceError> {
        Ok(text.bytes().map(u32::from).collect())
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String, ServiceError> {
        let bytes: Vec<u8> = ids
            .iter()
            .filter(|&&id| !(skip_special_tokens && id == BYTE_EOS))
            .filter_map(|&id| u8::try_from(id).ok())
            .collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn eos_token_id(&self) -> Option<u32> {
        Some(BYTE_EOS)
    }
}

/// Emits a fixed continuation after a prompt of known length, then EOS.
pub(crate) struct ScriptedModel {
    prompt_len: usize,
    script: Vec<u32>,
}

impl ScriptedModel {
    pub(crate) fn new(prompt: &str, continuation: &str) -> Self {
        Self {
            prompt_len: prompt.len(),
            script: continuation.bytes().map(u32::from).collect(),
        }
    }
}

impl CausalLm for ScriptedModel {
    fn next_token_logits(&self, input_ids: &[u32]) -> Result<Vec<f32>, ServiceError> {
        let step = input_ids.len().saturating_sub(self.prompt_len);
        let target = self.script.get(step).copied().unwrap_or(BYTE_EOS);
        let mut logits = vec![0.0; BYTE_EOS as usize + 1];
        logits[target as usize] = 20.0;
        Ok(logits)
    }

    fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            name: "scripted".into(),
            source: "memory".into(),
            quantized: false,
            dtype: "float32".into(),
            device: "cpu".into(),
            size_bytes: 0,
        }
    }
}
