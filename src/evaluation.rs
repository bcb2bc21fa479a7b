use std::{fs, path::Path, sync::Arc};

use serde::Serialize;
use tokio::task;
use tracing::info;

use crate::{
    error::ServiceError,
    model::{GenerationConfig, GenerationResponse, Generator, ModelRegistry, streaming::NullSink},
};

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkSample {
    pub instruction: String,
    pub reference_substring: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleReport {
    pub instruction: String,
    pub response: GenerationResponse,
    pub reference_match: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateMetrics {
    pub avg_latency_ms: f64,
    pub avg_tokens_per_s: f64,
    pub reference_match_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub samples: Vec<SampleReport>,
    pub aggregate: AggregateMetrics,
}

/// Runs every sample through `generator` and checks the completion for the
/// sample's reference substring (case-insensitive).
pub fn evaluate(
    generator: &Generator,
    config: &GenerationConfig,
    samples: Vec<BenchmarkSample>,
) -> Result<EvaluationReport, ServiceError> {
    if samples.is_empty() {
        return Err(ServiceError::BadRequest(
            "at least one benchmark sample is required".into(),
        ));
    }

    let mut reports = Vec::with_capacity(samples.len());
    for sample in samples {
        let response = generator.generate(&sample.instruction, config, &mut NullSink)?;
        let reference_match = sample.reference_substring.as_ref().map(|needle| {
            response
                .completion
                .to_lowercase()
                .contains(&needle.to_lowercase())
        });
        info!(
            instruction = %sample.instruction,
            tokens = response.tokens_generated,
            ?reference_match,
            "evaluated sample"
        );
        reports.push(SampleReport {
            instruction: sample.instruction,
            response,
            reference_match,
        });
    }

    let aggregate = summarize(&reports);
    Ok(EvaluationReport {
        samples: reports,
        aggregate,
    })
}

pub async fn run_benchmark(
    registry: Arc<ModelRegistry>,
    config: GenerationConfig,
    samples: Vec<BenchmarkSample>,
) -> Result<EvaluationReport, ServiceError> {
    let generator = registry.generator()?;
    task::spawn_blocking(move || evaluate(&generator, &config, samples))
        .await
        .map_err(|err| ServiceError::Inference(format!("evaluation task failed: {err}")))?
}

pub fn load_samples_from_path(path: &Path) -> Result<Vec<BenchmarkSample>, ServiceError> {
    let raw = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| ServiceError::BadRequest(format!("invalid benchmark file: {e}")))?;

    match value {
        serde_json::Value::Array(items) => {
            let mut samples = Vec::with_capacity(items.len());
            for (idx, item) in items.into_iter().enumerate() {
                let instruction = item
                    .get("instruction")
                    .or_else(|| item.get("description"))
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        ServiceError::BadRequest(format!(
                            "benchmark item {idx} missing string field 'instruction'"
                        ))
                    })?;
                let reference_substring = item
                    .get("reference_substring")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                samples.push(BenchmarkSample {
                    instruction: instruction.to_string(),
                    reference_substring,
                });
            }
            Ok(samples)
        }
        _ => Err(ServiceError::BadRequest(
            "benchmark file must be a JSON array".into(),
        )),
    }
}

pub fn fallback_samples() -> Vec<BenchmarkSample> {
    vec![
        BenchmarkSample {
            instruction: "defines a module that implements a 16-bit NOT gate. It takes a 16-bit \
                          input vector `in` and produces a 16-bit output vector `out`, where each \
                          bit of `out` is the logical negation (bitwise NOT) of the corresponding bit"
                .to_string(),
            reference_substring: Some("endmodule".to_string()),
        },
        BenchmarkSample {
            instruction: "module example (input a, input b, output c);".to_string(),
            reference_substring: Some("assign".to_string()),
        },
        BenchmarkSample {
            instruction: "a 4-bit synchronous up counter with active-high reset".to_string(),
            reference_substring: Some("always".to_string()),
        },
    ]
}

fn summarize(reports: &[SampleReport]) -> AggregateMetrics {
    AggregateMetrics {
        avg_latency_ms: mean(reports.iter().map(|r| r.response.total_time_ms as f64)),
        avg_tokens_per_s: mean(reports.iter().map(|r| r.response.tokens_per_second)),
        reference_match_rate: compute_match_rate(reports.iter().filter_map(|r| r.reference_match)),
    }
}

fn mean<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut count = 0usize;
    let mut acc = 0.0;
    for value in values {
        count += 1;
        acc += value;
    }
    if count == 0 { 0.0 } else { acc / count as f64 }
}

fn compute_match_rate<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = bool>,
{
    let mut count = 0usize;
    let mut matches = 0usize;
    for value in values {
        count += 1;
        if value {
            matches += 1;
        }
    }
    if count == 0 {
        None
    } else {
        Some(matches as f64 / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::testing::{ByteCodec, ScriptedModel},
        prompt::PromptTemplate,
    };

    #[test]
    fn match_rate_ignores_samples_without_reference() {
        assert_eq!(compute_match_rate([true, false, true, true]), Some(0.75));
        assert_eq!(compute_match_rate(Vec::<bool>::new()), None);
        assert_eq!(mean([2.0, 4.0]), 3.0);
    }

    #[test]
    fn evaluates_reference_substrings() {
        let instruction = "an and gate";
        let prompt = PromptTemplate::Alpaca.format_instruction(instruction);
        let generator = Generator::new(
            Arc::new(ScriptedModel::new(&prompt, "assign y = a & b;\nENDMODULE")),
            Arc::new(ByteCodec),
            PromptTemplate::Alpaca,
            4096,
        );
        let samples = vec![
            BenchmarkSample {
                instruction: instruction.into(),
                reference_substring: Some("endmodule".into()),
            },
            BenchmarkSample {
                instruction: instruction.into(),
                reference_substring: Some("always".into()),
            },
        ];
        let report = evaluate(&generator, &GenerationConfig::default(), samples).unwrap();
        assert_eq!(report.samples[0].reference_match, Some(true));
        assert_eq!(report.samples[1].reference_match, Some(false));
        assert_eq!(report.aggregate.reference_match_rate, Some(0.5));
    }

    #[test]
    fn empty_sample_list_is_rejected() {
        let generator = Generator::new(
            Arc::new(ScriptedModel::new("", "")),
            Arc::new(ByteCodec),
            PromptTemplate::Alpaca,
            16,
        );
        let err = evaluate(&generator, &GenerationConfig::default(), vec![]).unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));
    }

    #[test]
    fn loads_samples_with_description_alias() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.json");
        fs::write(
            &path,
            r#"[{"description": "xor gate", "reference_substring": "^"}, {"instruction": "mux"}]"#,
        )
        .unwrap();
        let samples = load_samples_from_path(&path).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].instruction, "xor gate");
        assert_eq!(samples[0].reference_substring.as_deref(), Some("^"));
        assert!(samples[1].reference_substring.is_none());
    }
}
