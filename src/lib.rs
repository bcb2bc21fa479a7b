pub mod cli;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod finetune;
pub mod model;
pub mod prompt;
pub mod quantization;
pub mod server;

pub use config::AppConfig;
pub use error::ServiceError;
pub use evaluation::{BenchmarkSample, EvaluationReport};
pub use model::{GenerationConfig, GenerationRequest, GenerationResponse, Generator, ModelRegistry};
pub use prompt::PromptTemplate;
pub use server::build_router;
