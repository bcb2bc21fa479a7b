use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::task;
use tracing::{error, info};

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{
        GenerationConfig, GenerationRequest, GenerationResponse, Generator, ModelMetadata,
        loader::ModelArtifacts, streaming::NullSink,
    },
};

/// Holds the process-wide generator once it has been loaded.
#[derive(Default)]
pub struct ModelRegistry {
    generator: OnceCell<Arc<Generator>>,
}

impl ModelRegistry {
    /// An empty registry; generation answers [`ServiceError::ModelLoading`]
    /// until [`ModelRegistry::install`] is called.
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn with_generator(generator: Generator) -> Self {
        let registry = Self::default();
        registry.install(generator);
        registry
    }

    /// Returns `false` if a generator was already installed.
    pub fn install(&self, generator: Generator) -> bool {
        self.generator.set(Arc::new(generator)).is_ok()
    }

    /// Loads the model on a blocking thread and installs it when ready.
    pub fn load_in_background(self: &Arc<Self>, config: Arc<AppConfig>) -> task::JoinHandle<()> {
        let registry = Arc::clone(self);
        task::spawn_blocking(move || match ModelArtifacts::load(&config) {
            Ok(artifacts) => {
                registry.install(artifacts.into_generator(&config));
                info!(model_id = %config.model_id, "model ready");
            }
            Err(err) => {
                error!(%err, "model failed to load");
                std::process::exit(1);
            }
        })
    }

    pub fn is_ready(&self) -> bool {
        self.generator.get().is_some()
    }

    pub fn generator(&self) -> Result<Arc<Generator>, ServiceError> {
        self.generator
            .get()
            .cloned()
            .ok_or(ServiceError::ModelLoading)
    }

    pub fn metadata(&self) -> Option<ModelMetadata> {
        self.generator.get().map(|g| g.metadata())
    }

    pub async fn generate(
        &self,
        request: GenerationRequest,
        defaults: &GenerationConfig,
    ) -> Result<GenerationResponse, ServiceError> {
        let generator = self.generator()?;
        let config = defaults.merged_with(&request);
        let instruction = request.instruction;

        task::spawn_blocking(move || generator.generate(&instruction, &config, &mut NullSink))
            .await
            .map_err(|err| ServiceError::Inference(format!("inference task failed: {err}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::testing::{ByteCodec, ScriptedModel},
        prompt::PromptTemplate,
    };

    fn generator(continuation: &str) -> Generator {
        let prompt = PromptTemplate::Alpaca.format_instruction("a buffer");
        Generator::new(
            Arc::new(ScriptedModel::new(&prompt, continuation)),
            Arc::new(ByteCodec),
            PromptTemplate::Alpaca,
            4096,
        )
    }

    #[test]
    fn pending_registry_reports_loading() {
        let registry = ModelRegistry::pending();
        assert!(!registry.is_ready());
        assert!(registry.metadata().is_none());
        assert!(matches!(registry.generator(), Err(ServiceError::ModelLoading)));
    }

    #[test]
    fn first_install_wins() {
        let registry = ModelRegistry::pending();
        assert!(registry.install(generator("assign y = a;")));
        assert!(!registry.install(generator("assign y = b;")));
        assert!(registry.is_ready());
    }

    #[tokio::test]
    async fn generates_on_a_blocking_thread() {
        let registry = ModelRegistry::with_generator(generator("assign y = a;"));
        let defaults = GenerationConfig {
            do_sample: false,
            ..GenerationConfig::default()
        };
        let response = registry
            .generate(GenerationRequest::new("a buffer"), &defaults)
            .await
            .unwrap();
        assert_eq!(response.completion, "assign y = a;");
    }
}
