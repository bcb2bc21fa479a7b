use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokenizers::{FromPretrainedParameters, Tokenizer};
use tracing::info;

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{CausalLm, Generator, QuantizationMode, TextCodec},
};

const MODULE_FILES: &[&str] = &["model.pt", "model.ts"];
const QUANTIZED_MODULE_FILES: &[&str] = &["model_int8.pt", "model_int8.ts"];
pub const TOKENIZER_FILE: &str = "tokenizer.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenizerSource {
    File(PathBuf),
    Hub {
        id: String,
        revision: Option<String>,
    },
}

/// Where the weights and the tokenizer for a model identifier live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    pub module_path: PathBuf,
    pub tokenizer: TokenizerSource,
}

impl ModelSource {
    /// A model identifier naming a directory (for example a fine-tuning
    /// checkpoint) is looked into first; otherwise the configured artifact
    /// paths are used and a missing tokenizer file is fetched from the hub.
    pub fn resolve(config: &AppConfig) -> ModelSource {
        let quantized = config.load.quantization == QuantizationMode::Int8;
        let dir = Path::new(&config.model_id);
        if dir.is_dir() {
            let candidates = if quantized {
                QUANTIZED_MODULE_FILES
            } else {
                MODULE_FILES
            };
            let module_path = candidates
                .iter()
                .map(|name| dir.join(name))
                .find(|p| p.exists())
                .unwrap_or_else(|| dir.join(candidates[0]));
            let tokenizer_path = dir.join(TOKENIZER_FILE);
            let tokenizer = if tokenizer_path.exists() {
                TokenizerSource::File(tokenizer_path)
            } else {
                TokenizerSource::File(config.tokenizer_path.clone())
            };
            return ModelSource {
                module_path,
                tokenizer,
            };
        }

        let module_path = if quantized {
            config.quantized_model_path.clone()
        } else {
            config.model_path.clone()
        };
        let tokenizer = if config.tokenizer_path.exists() {
            TokenizerSource::File(config.tokenizer_path.clone())
        } else {
            TokenizerSource::Hub {
                id: config.model_id.clone(),
                revision: config.revision.clone(),
            }
        };
        ModelSource {
            module_path,
            tokenizer,
        }
    }
}

pub struct ModelArtifacts {
    pub tokenizer: Arc<Tokenizer>,
    pub model: Arc<dyn CausalLm>,
}

impl ModelArtifacts {
    pub fn load(config: &AppConfig) -> Result<Self, ServiceError> {
        let source = ModelSource::resolve(config);
        info!(
            model_id = %config.model_id,
            module = %source.module_path.display(),
            "resolving model artifacts"
        );
        let tokenizer = Arc::new(load_tokenizer(&source.tokenizer)?);
        let model = load_model(config, &source.module_path)?;
        Ok(Self { tokenizer, model })
    }

    pub fn into_generator(self, config: &AppConfig) -> Generator {
        let codec: Arc<dyn TextCodec> = self.tokenizer;
        Generator::new(self.model, codec, config.template, config.max_seq_length)
    }
}

pub fn load_tokenizer(source: &TokenizerSource) -> Result<Tokenizer, ServiceError> {
    match source {
        TokenizerSource::File(path) => {
            Tokenizer::from_file(path).map_err(|e| ServiceError::Tokenizer(e.to_string()))
        }
        TokenizerSource::Hub { id, revision } => {
            let params = FromPretrainedParameters {
                revision: revision.clone().unwrap_or_else(|| "main".to_string()),
                ..Default::default()
            };
            Tokenizer::from_pretrained(id, Some(params))
                .map_err(|e| ServiceError::Tokenizer(format!("{id}: {e}")))
        }
    }
}

#[cfg(feature = "tch-backend")]
fn load_model(config: &AppConfig, module_path: &Path) -> Result<Arc<dyn CausalLm>, ServiceError> {
    let instance = torch::ModelInstance::new(config, module_path)?;
    Ok(Arc::new(instance))
}

#[cfg(not(feature = "tch-backend"))]
fn load_model(_config: &AppConfig, module_path: &Path) -> Result<Arc<dyn CausalLm>, ServiceError> {
    Err(ServiceError::Other(format!(
        "cannot load {}: built without the tch-backend feature",
        module_path.display()
    )))
}

#[cfg(feature = "tch-backend")]
mod torch {
    use std::{fs, path::Path};

    use parking_lot::Mutex;
    use tch::{Device, IValue, Kind, Tensor, no_grad};

    use crate::{
        config::AppConfig,
        error::ServiceError,
        model::{CausalLm, ModelMetadata, QuantizationMode},
    };

    /// A TorchScript causal LM whose forward returns logits, either bare or
    /// as the first element of a tuple.
    pub struct ModelInstance {
        name: String,
        source: String,
        quantized: bool,
        kind: Kind,
        size_bytes: u64,
        device: Device,
        module: Mutex<tch::CModule>,
    }

    impl ModelInstance {
        pub fn new(config: &AppConfig, module_path: &Path) -> Result<Self, ServiceError> {
            let quantized = config.load.quantization == QuantizationMode::Int8;
            if quantized && !module_path.exists() {
                return Err(ServiceError::Quantization(format!(
                    "int8 artifact missing: {}; export a quantized module first",
                    module_path.display()
                )));
            }
            if !module_path.exists() {
                return Err(ServiceError::Other(format!(
                    "model artifact missing: {}",
                    module_path.display()
                )));
            }
            let size_bytes = fs::metadata(module_path)?.len();
            let device = config.load.device.resolve();

            let mut module = tch::CModule::load_on_device(module_path, device)
                .map_err(|e| ServiceError::Inference(e.to_string()))?;
            // int8 modules carry packed weights that cannot be cast
            let kind = if quantized {
                Kind::QInt8
            } else {
                let kind = config.load.precision.resolve(device);
                module.to(device, kind, false);
                kind
            };
            module.set_eval();

            tracing::info!(
                path = %module_path.display(),
                ?device,
                ?kind,
                size_bytes,
                "model loaded"
            );

            Ok(Self {
                name: config.model_id.clone(),
                source: module_path.display().to_string(),
                quantized,
                kind,
                size_bytes,
                device,
                module: Mutex::new(module),
            })
        }
    }

    impl CausalLm for ModelInstance {
        fn next_token_logits(&self, input_ids: &[u32]) -> Result<Vec<f32>, ServiceError> {
            let ids: Vec<i64> = input_ids.iter().map(|&id| id as i64).collect();
            no_grad(|| {
                let module = self.module.lock();
                let input = Tensor::from_slice(&ids)
                    .reshape([1, ids.len() as i64])
                    .to(self.device);
                let output = module
                    .forward_is(&[IValue::Tensor(input)])
                    .map_err(|e| ServiceError::Inference(e.to_string()))?;

                let logits = match output {
                    IValue::Tensor(t) => t,
                    IValue::Tuple(ref items) if !items.is_empty() => match &items[0] {
                        IValue::Tensor(t) => t.shallow_clone(),
                        _ => {
                            return Err(ServiceError::Inference(
                                "expected tensor as first tuple element".into(),
                            ));
                        }
                    },
                    _ => {
                        return Err(ServiceError::Inference(
                            "unexpected model output format".into(),
                        ));
                    }
                };

                // [1, seq_len, vocab] -> [vocab]
                let last = logits
                    .select(1, -1)
                    .squeeze_dim(0)
                    .to_kind(Kind::Float)
                    .to_device(Device::Cpu);
                Vec::<f32>::try_from(&last).map_err(|e| ServiceError::Inference(e.to_string()))
            })
        }

        fn metadata(&self) -> ModelMetadata {
            ModelMetadata {
                name: self.name.clone(),
                source: self.source.clone(),
                quantized: self.quantized,
                dtype: format!("{:?}", self.kind).to_lowercase(),
                device: format!("{:?}", self.device).to_lowercase(),
                size_bytes: self.size_bytes,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn config_with(model_id: &str, tokenizer: PathBuf) -> AppConfig {
        let mut config = AppConfig::from_lookup(|_| None);
        config.model_id = model_id.to_string();
        config.tokenizer_path = tokenizer;
        config
    }

    #[test]
    fn checkpoint_directory_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.pt"), b"").unwrap();
        std::fs::write(dir.path().join(TOKENIZER_FILE), b"{}").unwrap();

        let config = config_with(dir.path().to_str().unwrap(), PathBuf::from("unused.json"));
        let source = ModelSource::resolve(&config);
        assert_eq!(source.module_path, dir.path().join("model.pt"));
        assert_eq!(
            source.tokenizer,
            TokenizerSource::File(dir.path().join(TOKENIZER_FILE))
        );
    }

    #[test]
    fn int8_prefers_quantized_artifact_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.pt"), b"").unwrap();
        std::fs::write(dir.path().join("model_int8.pt"), b"").unwrap();

        let mut config = config_with(dir.path().to_str().unwrap(), PathBuf::from("unused.json"));
        config.load.quantization = QuantizationMode::Int8;
        let source = ModelSource::resolve(&config);
        assert_eq!(source.module_path, dir.path().join("model_int8.pt"));
    }

    #[test]
    fn hub_id_without_local_tokenizer_goes_to_hub() {
        let mut config = config_with("Irfantariq01/lora_model", PathBuf::from("/nonexistent/tok.json"));
        config.revision = Some("v2".into());
        let source = ModelSource::resolve(&config);
        assert_eq!(source.module_path, config.model_path);
        assert_eq!(
            source.tokenizer,
            TokenizerSource::Hub {
                id: "Irfantariq01/lora_model".into(),
                revision: Some("v2".into()),
            }
        );
    }

    #[test]
    fn missing_tokenizer_file_is_an_error() {
        let err = load_tokenizer(&TokenizerSource::File("/nonexistent/tokenizer.json".into()))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Tokenizer(_)));
    }
}
