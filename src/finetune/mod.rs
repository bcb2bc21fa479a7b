//! Supervised fine-tuning on a description -> Verilog dataset.
//!
//! The pipeline is fixed: load the dataset, split off a validation set,
//! render every example through a prompt template, tokenize (labels are a
//! copy of the inputs), train, and save a checkpoint directory that the
//! inference path can load by passing it as the model id.

pub mod args;
pub mod checkpoint;
pub mod dataset;
pub mod encode;
pub mod schedule;
#[cfg(feature = "tch-backend")]
pub mod trainer;

use std::path::{Path, PathBuf};

use tracing::info;

use crate::{
    config::AppConfig,
    error::ServiceError,
    evaluation::EvaluationReport,
    model::{QuantizationMode, TextCodec},
    prompt::PromptTemplate,
};

pub use args::{FineTuneMethod, LoraConfig, SchedulerKind, TrainingArguments};
pub use checkpoint::{LogEntry, TrainerState};
pub use dataset::{DatasetSplit, TrainingExample, load_examples, train_test_split};
pub use encode::{Batch, DataCollator, EncodedExample, PaddingSide, batch_plan, pack, tokenize};
pub use schedule::LrSchedule;

/// Tokenized train and validation sets.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub train: Vec<EncodedExample>,
    pub eval: Vec<EncodedExample>,
}

/// Splits, formats and tokenizes raw examples according to `args`.
pub fn prepare_data(
    examples: Vec<TrainingExample>,
    args: &TrainingArguments,
    codec: &dyn TextCodec,
) -> Result<PreparedData, ServiceError> {
    let split = train_test_split(examples, args.test_size, args.seed)?;
    let encode_all = |examples: &[TrainingExample]| -> Result<Vec<EncodedExample>, ServiceError> {
        let encoded = examples
            .iter()
            .map(|example| {
                let text = args.template.format_example(example);
                tokenize(codec, &text, args.max_length, args.add_eos_token)
            })
            .collect::<Result<Vec<_>, _>>()?;
        if args.packing {
            Ok(pack(&encoded, args.max_length, codec.eos_token_id()))
        } else {
            Ok(encoded)
        }
    };

    let train = encode_all(&split.train)?;
    let eval = encode_all(&split.eval)?;
    if train.is_empty() {
        return Err(ServiceError::Dataset(
            "no training sequences left after tokenization".into(),
        ));
    }
    info!(
        train = train.len(),
        eval = eval.len(),
        template = %args.template,
        packing = args.packing,
        "prepared fine-tuning data"
    );
    Ok(PreparedData { train, eval })
}

/// Inputs of a fine-tuning run.
#[derive(Debug, Clone)]
pub struct FinetuneJob {
    pub dataset_path: PathBuf,
    /// Base model location and device settings.
    pub base: AppConfig,
    pub args: TrainingArguments,
}

#[derive(Debug, Clone)]
pub struct FinetuneSummary {
    pub output_dir: PathBuf,
    pub state: TrainerState,
    /// Base model output before training.
    pub baseline: Option<EvaluationReport>,
    /// Fine-tuned model output, reloaded from `output_dir`.
    pub evaluation: Option<EvaluationReport>,
}

/// Settings for the one-prompt check run around training: `VerilogEval`
/// template, greedy decoding, 100 new tokens. With a checkpoint the model is
/// loaded from that directory in full precision.
pub fn smoke_config(base: &AppConfig, checkpoint: Option<&Path>) -> AppConfig {
    let mut config = base.clone();
    config.template = PromptTemplate::VerilogEval;
    config.generation.max_new_tokens = 100;
    config.generation.do_sample = false;
    if let Some(dir) = checkpoint {
        config.model_id = dir.display().to_string();
        config.load.quantization = QuantizationMode::None;
    }
    config
}

#[cfg(feature = "tch-backend")]
fn smoke_test(config: &AppConfig) -> Result<EvaluationReport, ServiceError> {
    use crate::{
        evaluation::{evaluate, fallback_samples},
        model::ModelArtifacts,
    };

    let generator = ModelArtifacts::load(config)?.into_generator(config);
    let samples = fallback_samples().into_iter().take(1).collect();
    let report = evaluate(&generator, &config.generation, samples)?;
    for sample in &report.samples {
        info!(
            model_id = %config.model_id,
            tokens = sample.response.tokens_generated,
            "{}",
            sample.response.text
        );
    }
    Ok(report)
}

/// Trains on `job.dataset_path` and writes the result to `args.output_dir`.
#[cfg(feature = "tch-backend")]
pub fn run(job: &FinetuneJob) -> Result<FinetuneSummary, ServiceError> {
    use crate::model::{ModelSource, TOKENIZER_FILE, load_tokenizer};

    let args = &job.args;
    args.validate()?;

    let examples = load_examples(&job.dataset_path)?;
    info!(count = examples.len(), path = %job.dataset_path.display(), "loaded dataset");

    let source = ModelSource::resolve(&job.base);
    let tokenizer = load_tokenizer(&source.tokenizer)?;
    let data = prepare_data(examples, args, &tokenizer)?;

    let baseline = if args.pre_training_eval {
        Some(smoke_test(&smoke_config(&job.base, None))?)
    } else {
        None
    };

    let resume = checkpoint::resolve_resume(args.resume_from_checkpoint.as_deref());
    let device = job.base.load.device.resolve();
    let mut trainer =
        trainer::Trainer::new(args.clone(), &source.module_path, device, resume.as_deref())?;
    let collator = DataCollator::new(TextCodec::pad_token_id(&tokenizer), args.pad_to_multiple_of);
    let state = trainer.train(&data.train, &data.eval, &collator)?;

    trainer.save(&args.output_dir, &state)?;
    tokenizer
        .save(args.output_dir.join(TOKENIZER_FILE), false)
        .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
    info!(path = %args.output_dir.display(), "fine-tuned model saved");
    drop(trainer);

    let evaluation = if args.post_training_eval {
        Some(smoke_test(&smoke_config(&job.base, Some(&args.output_dir)))?)
    } else {
        None
    };

    Ok(FinetuneSummary {
        output_dir: args.output_dir.clone(),
        state,
        baseline,
        evaluation,
    })
}

#[cfg(not(feature = "tch-backend"))]
pub fn run(_job: &FinetuneJob) -> Result<FinetuneSummary, ServiceError> {
    Err(ServiceError::Training(
        "fine-tuning requires the tch-backend feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::ByteCodec;

    fn examples(n: usize) -> Vec<TrainingExample> {
        (0..n)
            .map(|i| TrainingExample {
                description: format!("gate {i}"),
                code: "assign y = ~a;".into(),
            })
            .collect()
    }

    #[test]
    fn prepares_formatted_and_tokenized_sets() {
        let args = TrainingArguments {
            template: PromptTemplate::InstructionResponse,
            max_length: 1024,
            ..TrainingArguments::default()
        };
        let data = prepare_data(examples(20), &args, &ByteCodec).unwrap();
        assert_eq!(data.train.len(), 18);
        assert_eq!(data.eval.len(), 2);

        let first = &data.train[0];
        let text = ByteCodec.decode(&first.input_ids, true).unwrap();
        assert!(text.starts_with("### Instruction:\ngate "));
        assert!(text.ends_with("### Response:\nassign y = ~a;"));
        assert_eq!(first.labels.len(), first.input_ids.len());
    }

    #[test]
    fn packing_yields_fixed_blocks() {
        let args = TrainingArguments {
            packing: true,
            max_length: 32,
            ..TrainingArguments::default()
        };
        let data = prepare_data(examples(20), &args, &ByteCodec).unwrap();
        assert!(!data.train.is_empty());
        assert!(data.train.iter().all(|e| e.len() == 32));
    }

    #[test]
    fn smoke_config_is_greedy_and_short() {
        let mut base = AppConfig::from_lookup(|_| None);
        base.model_id = "codellama/CodeLlama-7b-hf".into();
        base.load.quantization = QuantizationMode::Int8;

        let before = smoke_config(&base, None);
        assert_eq!(before.model_id, base.model_id);
        assert_eq!(before.template, PromptTemplate::VerilogEval);
        assert_eq!(before.generation.max_new_tokens, 100);
        assert!(!before.generation.do_sample);
        assert!(before.generation.is_greedy());
        assert_eq!(before.load.quantization, QuantizationMode::Int8);

        let after = smoke_config(&base, Some(Path::new("runs/verilog-code-llama")));
        assert_eq!(after.model_id, "runs/verilog-code-llama");
        assert_eq!(after.load.quantization, QuantizationMode::None);
        assert!(!after.generation.do_sample);
        assert_eq!(after.generation.max_new_tokens, 100);
    }
}
