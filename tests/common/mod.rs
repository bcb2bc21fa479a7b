#![allow(dead_code)]

use std::sync::Arc;

use verilog_codegen::{
    AppConfig, Generator, ModelRegistry, PromptTemplate, ServiceError,
    model::{CausalLm, ModelMetadata, TextCodec},
};

pub const EOS: u32 = 256;
pub const SCRIPT: &str = "module top(input a, output y);\n  assign y = ~a;\nendmodule";

/// One token per byte plus an end-of-sequence id.
pub struct Bytes;

impl TextCodec for Bytes {
    fn encode(&self, text: &str, _add_special_tokens: bool) -> Result<Vec<u32>, ServiceError> {
        Ok(text.bytes().map(u32::from).collect())
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String, ServiceError> {
        let bytes: Vec<u8> = ids
            .iter()
            .filter(|&&id| !(skip_special_tokens && id == EOS))
            .filter_map(|&id| u8::try_from(id).ok())
            .collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn eos_token_id(&self) -> Option<u32> {
        Some(EOS)
    }
}

/// Writes `SCRIPT` after any prompt: the next byte is chosen by the longest
/// prefix of the script the input already ends with.
pub struct ScriptModel;

impl CausalLm for ScriptModel {
    fn next_token_logits(&self, input_ids: &[u32]) -> Result<Vec<f32>, ServiceError> {
        let script: Vec<u32> = SCRIPT.bytes().map(u32::from).collect();
        let written = (0..=script.len())
            .rev()
            .find(|&k| input_ids.ends_with(&script[..k]))
            .unwrap_or(0);
        let target = script.get(written).copied().unwrap_or(EOS);
        let mut logits = vec![0.0; EOS as usize + 1];
        logits[target as usize] = 30.0;
        Ok(logits)
    }

    fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            name: "script".into(),
            source: "memory".into(),
            quantized: false,
            dtype: "float32".into(),
            device: "cpu".into(),
            size_bytes: 0,
        }
    }
}

pub fn test_config() -> Arc<AppConfig> {
    Arc::new(AppConfig::from_lookup(|key| match key {
        "DO_SAMPLE" => Some("false".to_string()),
        "MODEL_ID" => Some("script".to_string()),
        _ => None,
    }))
}

pub fn ready_registry() -> Arc<ModelRegistry> {
    let generator = Generator::new(
        Arc::new(ScriptModel),
        Arc::new(Bytes),
        PromptTemplate::Alpaca,
        4096,
    );
    Arc::new(ModelRegistry::with_generator(generator))
}
