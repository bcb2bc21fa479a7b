use std::{sync::Arc, time::Instant};

use tracing::debug;

use crate::{
    error::ServiceError,
    model::{
        FinishReason, GenerationConfig, GenerationResponse, ModelMetadata, TextCodec,
        sampling::Sampler,
        streaming::{StreamDecoder, TokenSink},
    },
    prompt::PromptTemplate,
};

/// A causal language model exposed as "logits for the next position".
pub trait CausalLm: Send + Sync {
    /// Runs the model over `input_ids` and returns the logits of the last
    /// position, one entry per vocabulary item.
    fn next_token_logits(&self, input_ids: &[u32]) -> Result<Vec<f32>, ServiceError>;

    fn metadata(&self) -> ModelMetadata;
}

/// Prompt template + tokenizer + model, ready to answer instructions.
pub struct Generator {
    model: Arc<dyn CausalLm>,
    codec: Arc<dyn TextCodec>,
    template: PromptTemplate,
    max_seq_length: usize,
}

impl Generator {
    pub fn new(
        model: Arc<dyn CausalLm>,
        codec: Arc<dyn TextCodec>,
        template: PromptTemplate,
        max_seq_length: usize,
    ) -> Self {
        Self {
            model,
            codec,
            template,
            max_seq_length,
        }
    }

    pub fn template(&self) -> PromptTemplate {
        self.template
    }

    pub fn metadata(&self) -> ModelMetadata {
        self.model.metadata()
    }

    /// Formats `instruction` with the generator's template and generates.
    pub fn generate(
        &self,
        instruction: &str,
        config: &GenerationConfig,
        sink: &mut dyn TokenSink,
    ) -> Result<GenerationResponse, ServiceError> {
        let prompt = self.template.format_instruction(instruction);
        self.generate_from_prompt(&prompt, config, sink)
    }

    /// Generates a continuation for an already formatted prompt.
    pub fn generate_from_prompt(
        &self,
        prompt: &str,
        config: &GenerationConfig,
        sink: &mut dyn TokenSink,
    ) -> Result<GenerationResponse, ServiceError> {
        let mut input_ids = self.codec.encode(prompt, true)?;
        if input_ids.is_empty() {
            input_ids.push(self.codec.pad_token_id());
        }
        let prompt_token_len = input_ids.len();
        let eos = self.codec.eos_token_id();
        let mut sampler = Sampler::new(config);
        let mut stream = StreamDecoder::new();
        let mut finish_reason = FinishReason::MaxTokens;

        let start = Instant::now();
        for _ in 0..config.max_new_tokens {
            let window_start = input_ids.len().saturating_sub(self.max_seq_length);
            let mut logits = self.model.next_token_logits(&input_ids[window_start..])?;
            if logits.is_empty() {
                return Err(ServiceError::Inference("model returned no logits".into()));
            }
            let next = sampler.next_token(&mut logits);
            input_ids.push(next);

            if Some(next) == eos {
                finish_reason = FinishReason::EndOfSequence;
                break;
            }
            if let Some(delta) = stream.push(self.codec.as_ref(), next)? {
                sink.on_text(&delta)?;
            }
        }
        if let Some(delta) = stream.flush(self.codec.as_ref())? {
            sink.on_text(&delta)?;
        }
        sink.on_finish()?;
        let elapsed = start.elapsed();

        let generated = &input_ids[prompt_token_len..];
        let tokens_generated = generated.len();
        let completion = self.codec.decode(generated, true)?;
        let text = self.codec.decode(&input_ids, true)?;

        let tokens_per_second = if elapsed.as_secs_f64() > 0.0 {
            tokens_generated as f64 / elapsed.as_secs_f64()
        } else {
            tokens_generated as f64
        };
        debug!(
            tokens_generated,
            ?finish_reason,
            elapsed_ms = elapsed.as_millis() as u64,
            "generation finished"
        );

        Ok(GenerationResponse {
            prompt: prompt.to_string(),
            completion,
            text,
            tokens_generated,
            finish_reason,
            total_time_ms: elapsed.as_millis(),
            tokens_per_second,
            model: self.model.metadata(),
        })
    }
}
