use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
};

use tracing::warn;

use crate::{
    model::{GenerationConfig, LoadOptions},
    prompt::PromptTemplate,
};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    /// Hub id or path of a checkpoint directory.
    pub model_id: String,
    pub revision: Option<String>,
    pub model_path: PathBuf,
    pub quantized_model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub load: LoadOptions,
    pub template: PromptTemplate,
    pub max_seq_length: usize,
    pub generation: GenerationConfig,
    pub eval_prompts_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::from_lookup(|key| env::var(key).ok()))
    }

    /// Builds the configuration from any key/value source. Unset or
    /// unparseable values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr = lookup("SERVER_ADDR")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080));

        let model_id = lookup("MODEL_ID").unwrap_or_else(|| "Irfantariq01/lora_model".to_string());
        let revision = lookup("MODEL_REVISION");

        let model_path =
            PathBuf::from(lookup("MODEL_PATH").unwrap_or_else(|| "models/model.pt".to_string()));
        let quantized_model_path = PathBuf::from(
            lookup("QUANTIZED_MODEL_PATH").unwrap_or_else(|| "models/model_int8.pt".to_string()),
        );
        let tokenizer_path = PathBuf::from(
            lookup("TOKENIZER_PATH").unwrap_or_else(|| "models/tokenizer.json".to_string()),
        );

        let load = LoadOptions {
            precision: parsed(&lookup, "PRECISION").unwrap_or_default(),
            device: parsed(&lookup, "DEVICE").unwrap_or_default(),
            quantization: parsed(&lookup, "QUANTIZATION").unwrap_or_default(),
        };
        let template = parsed(&lookup, "PROMPT_TEMPLATE").unwrap_or_default();
        let max_seq_length = parsed(&lookup, "MAX_SEQ_LENGTH").unwrap_or(512);

        let defaults = GenerationConfig::default();
        let generation = GenerationConfig {
            max_new_tokens: parsed(&lookup, "MAX_NEW_TOKENS").unwrap_or(defaults.max_new_tokens),
            temperature: parsed(&lookup, "TEMPERATURE").unwrap_or(defaults.temperature),
            top_k: parsed(&lookup, "TOP_K").unwrap_or(defaults.top_k),
            top_p: parsed(&lookup, "TOP_P").unwrap_or(defaults.top_p),
            do_sample: parsed(&lookup, "DO_SAMPLE").unwrap_or(defaults.do_sample),
            seed: parsed(&lookup, "SEED"),
        };

        let eval_prompts_path = lookup("EVAL_PROMPTS_PATH").map(PathBuf::from);

        Self {
            listen_addr,
            model_id,
            revision,
            model_path,
            quantized_model_path,
            tokenizer_path,
            load,
            template,
            max_seq_length,
            generation,
            eval_prompts_path,
        }
    }
}

fn parsed<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}
