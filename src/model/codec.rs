use tokenizers::Tokenizer;

use crate::error::ServiceError;

/// End-of-sequence spellings used by the code models this crate targets
/// (Llama/CodeLlama, GPT-2 style, Qwen, Gemma).
const EOS_CANDIDATES: &[&str] = &["</s>", "<|endoftext|>", "<|im_end|>", "<eos>"];

/// Text <-> token id conversion used by generation and fine-tuning.
pub trait TextCodec: Send + Sync {
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>, ServiceError>;

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String, ServiceError>;

    fn eos_token_id(&self) -> Option<u32>;

    /// Id used to pad batches; falls back to 0.
    fn pad_token_id(&self) -> u32 {
        0
    }
}

impl TextCodec for Tokenizer {
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>, ServiceError> {
        // `Tokenizer` exposes its own methods through `Deref`, so the inner
        // implementation is named explicitly to avoid resolving to this trait.
        let encoding = (**self)
            .encode(text, add_special_tokens)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String, ServiceError> {
        (**self)
            .decode(ids, skip_special_tokens)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))
    }

    fn eos_token_id(&self) -> Option<u32> {
        EOS_CANDIDATES
            .iter()
            .find_map(|token| self.token_to_id(token))
    }

    fn pad_token_id(&self) -> u32 {
        self.get_padding().map(|p| p.pad_id).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use tokenizers::PaddingParams;

    use super::*;

    const WORD_LEVEL: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [
            {"id": 3, "content": "</s>", "single_word": false, "lstrip": false,
             "rstrip": false, "normalized": false, "special": true}
        ],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {"<unk>": 0, "module": 1, "endmodule": 2, "</s>": 3},
            "unk_token": "<unk>"
        }
    }"#;

    fn word_level() -> Tokenizer {
        Tokenizer::from_bytes(WORD_LEVEL).unwrap()
    }

    #[test]
    fn round_trips_through_the_tokenizer() {
        let tokenizer = word_level();
        let codec: &dyn TextCodec = &tokenizer;
        let ids = codec.encode("module endmodule", true).unwrap();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(codec.decode(&ids, true).unwrap(), "module endmodule");
    }

    #[test]
    fn special_tokens_are_skipped_on_decode() {
        let tokenizer = word_level();
        assert_eq!(
            TextCodec::decode(&tokenizer, &[1, 2, 3], true).unwrap(),
            "module endmodule"
        );
        assert_eq!(
            TextCodec::decode(&tokenizer, &[1, 3], false).unwrap(),
            "module </s>"
        );
    }

    #[test]
    fn finds_eos_and_falls_back_for_padding() {
        let mut tokenizer = word_level();
        assert_eq!(TextCodec::eos_token_id(&tokenizer), Some(3));
        assert_eq!(TextCodec::pad_token_id(&tokenizer), 0);

        tokenizer.with_padding(Some(PaddingParams {
            pad_id: 3,
            ..PaddingParams::default()
        }));
        assert_eq!(TextCodec::pad_token_id(&tokenizer), 3);
    }
}
