use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::State,
    response::Html,
    routing::{get, post},
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    config::AppConfig,
    error::ServiceError,
    evaluation::{EvaluationReport, fallback_samples, load_samples_from_path, run_benchmark},
    model::{GenerationConfig, GenerationRequest, GenerationResponse, ModelMetadata, ModelRegistry},
    prompt::PromptTemplate,
    quantization::QuantizationSummary,
};

const PAGE_TITLE: &str = "Code Generation with Small language model";
const PAGE_DESCRIPTION: &str = "Enter a description to generate Verilog or other code.";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ModelRegistry>,
    pub evaluation: Arc<RwLock<Option<EvaluationReport>>>,
}

#[derive(Serialize)]
struct MetadataResponse {
    ready: bool,
    model: Option<ModelMetadata>,
    template: PromptTemplate,
    generation: GenerationConfig,
    quantization: QuantizationSummary,
    evaluation: Option<EvaluationReport>,
}

#[derive(Debug, Deserialize)]
pub struct FormSubmission {
    pub description: String,
}

pub fn build_router(config: Arc<AppConfig>, registry: Arc<ModelRegistry>) -> Router {
    let state = AppState {
        evaluation: Arc::new(RwLock::new(None)),
        registry,
        config,
    };

    Router::new()
        .route("/", get(form_page).post(submit_form))
        .route("/health", get(health))
        .route("/generate", post(generate))
        .route("/metadata", get(metadata))
        .route("/evaluate", post(run_evaluation))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn form_page() -> Html<String> {
    Html(render_page("", None))
}

async fn submit_form(
    State(state): State<AppState>,
    Form(form): Form<FormSubmission>,
) -> Result<Html<String>, ServiceError> {
    let request = GenerationRequest::new(form.description.clone());
    let response = state
        .registry
        .generate(request, &state.config.generation)
        .await?;
    Ok(Html(render_page(&form.description, Some(&response.text))))
}

async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<GenerationResponse>, ServiceError> {
    let response = state
        .registry
        .generate(request, &state.config.generation)
        .await?;
    Ok(Json(response))
}

async fn metadata(State(state): State<AppState>) -> Json<MetadataResponse> {
    let evaluation = state.evaluation.read().clone();

    Json(MetadataResponse {
        ready: state.registry.is_ready(),
        model: state.registry.metadata(),
        template: state.config.template,
        generation: state.config.generation.clone(),
        quantization: QuantizationSummary::from_config(&state.config),
        evaluation,
    })
}

async fn run_evaluation(
    State(state): State<AppState>,
) -> Result<Json<EvaluationReport>, ServiceError> {
    let samples = if let Some(path) = state.config.eval_prompts_path.as_ref() {
        load_samples_from_path(path)?
    } else {
        fallback_samples()
    };

    info!(count = samples.len(), "running evaluation benchmark");

    let report = run_benchmark(
        state.registry.clone(),
        state.config.generation.clone(),
        samples,
    )
    .await?;
    state.evaluation.write().replace(report.clone());

    Ok(Json(report))
}

fn render_page(description: &str, generated: Option<&str>) -> String {
    let output = match generated {
        Some(code) => format!(
            "<section><h2>Generated Code</h2><pre><code>{}</code></pre></section>",
            escape_html(code)
        ),
        None => String::new(),
    };
    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>{PAGE_TITLE}</title></head>\
         <body><h1>{PAGE_TITLE}</h1><p>{PAGE_DESCRIPTION}</p>\
         <form method=\"post\" action=\"/\">\
         <textarea name=\"description\" rows=\"5\" cols=\"80\" \
         placeholder=\"Enter your description here...\">{}</textarea><br>\
         <button type=\"submit\">Submit</button></form>{output}</body></html>\n",
        escape_html(description)
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
