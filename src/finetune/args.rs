use std::{fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{error::ServiceError, prompt::PromptTemplate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FineTuneMethod {
    /// Train only adapter parameters, everything else frozen.
    #[default]
    Lora,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    #[default]
    Linear,
    Constant,
    ConstantWithWarmup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraConfig {
    pub r: usize,
    pub lora_alpha: usize,
    pub lora_dropout: f64,
    pub target_modules: Vec<String>,
    pub bias: String,
    pub task_type: String,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            r: 16,
            lora_alpha: 16,
            lora_dropout: 0.05,
            target_modules: ["q_proj", "k_proj", "v_proj", "o_proj"]
                .into_iter()
                .map(String::from)
                .collect(),
            bias: "none".to_string(),
            task_type: "CAUSAL_LM".to_string(),
        }
    }
}

impl LoraConfig {
    /// Whether a module parameter belongs to an adapter attached to one of
    /// the target projections, e.g. `layers.3.self_attn.q_proj.lora_A.weight`.
    /// Parameter stores flatten `.` to `_`, so both separators count as a
    /// boundary in front of the target name.
    pub fn is_adapter_parameter(&self, name: &str) -> bool {
        name.contains("lora_")
            && self.target_modules.iter().any(|target| {
                name.match_indices(target.as_str()).any(|(i, _)| {
                    i == 0 || matches!(name.as_bytes()[i - 1], b'.' | b'_')
                })
            })
    }
}

/// Hyperparameters for a fine-tuning run. Every field has a default, so a
/// JSON override file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingArguments {
    pub output_dir: PathBuf,
    pub method: FineTuneMethod,
    pub lora: LoraConfig,
    pub template: PromptTemplate,
    pub test_size: f64,
    pub seed: u64,
    pub max_length: usize,
    pub add_eos_token: bool,
    pub packing: bool,
    pub pad_to_multiple_of: Option<usize>,
    pub group_by_length: bool,
    pub per_device_train_batch_size: usize,
    pub per_device_eval_batch_size: usize,
    pub gradient_accumulation_steps: usize,
    pub num_train_epochs: usize,
    pub max_steps: Option<usize>,
    pub learning_rate: f64,
    pub lr_scheduler_type: SchedulerKind,
    pub warmup_steps: usize,
    pub weight_decay: f64,
    pub max_grad_norm: f64,
    pub logging_steps: usize,
    pub eval_steps: usize,
    pub save_steps: usize,
    pub save_total_limit: Option<usize>,
    pub fp16: bool,
    pub resume_from_checkpoint: Option<PathBuf>,
    /// Generate for one built-in prompt with the base model before training.
    pub pre_training_eval: bool,
    pub post_training_eval: bool,
}

impl Default for TrainingArguments {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("verilog-code-llama"),
            method: FineTuneMethod::Lora,
            lora: LoraConfig::default(),
            template: PromptTemplate::VerilogInput,
            test_size: 0.1,
            seed: 42,
            max_length: 512,
            add_eos_token: true,
            packing: false,
            pad_to_multiple_of: Some(8),
            group_by_length: true,
            per_device_train_batch_size: 4,
            per_device_eval_batch_size: 4,
            gradient_accumulation_steps: 4,
            num_train_epochs: 3,
            max_steps: None,
            learning_rate: 2e-4,
            lr_scheduler_type: SchedulerKind::Linear,
            warmup_steps: 100,
            weight_decay: 0.01,
            max_grad_norm: 1.0,
            logging_steps: 10,
            eval_steps: 20,
            save_steps: 20,
            save_total_limit: Some(2),
            fp16: true,
            resume_from_checkpoint: None,
            pre_training_eval: true,
            post_training_eval: true,
        }
    }
}

impl TrainingArguments {
    /// Defaults overridden by the fields present in a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ServiceError> {
        let raw = fs::read_to_string(path)?;
        let args: TrainingArguments = serde_json::from_str(&raw)?;
        args.validate()?;
        Ok(args)
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        let invalid = |msg: &str| Err(ServiceError::Training(msg.to_string()));
        if self.per_device_train_batch_size == 0 || self.per_device_eval_batch_size == 0 {
            return invalid("batch sizes must be at least 1");
        }
        if self.gradient_accumulation_steps == 0 {
            return invalid("gradient_accumulation_steps must be at least 1");
        }
        if self.max_length < 2 {
            return invalid("max_length must be at least 2");
        }
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return invalid("test_size must be in (0, 1)");
        }
        if self.max_steps == Some(0) || (self.max_steps.is_none() && self.num_train_epochs == 0) {
            return invalid("nothing to train: zero epochs and no max_steps");
        }
        if self.learning_rate <= 0.0 {
            return invalid("learning_rate must be positive");
        }
        Ok(())
    }

    /// Optimizer updates per epoch for a training set of `num_examples`.
    /// A trailing partial accumulation still counts as one update.
    pub fn steps_per_epoch(&self, num_examples: usize) -> usize {
        let batches = num_examples.div_ceil(self.per_device_train_batch_size);
        batches.div_ceil(self.gradient_accumulation_steps).max(1)
    }

    /// Whether the optimizer steps after micro-batch `index` (0-based) of an
    /// epoch with `batches` micro-batches. Accumulation restarts every epoch.
    pub fn is_update_step(&self, index: usize, batches: usize) -> bool {
        let accum = self.gradient_accumulation_steps.max(1);
        (index + 1) % accum == 0 || index + 1 == batches
    }

    /// Number of micro-batches whose gradients are summed into the update
    /// that micro-batch `index` belongs to.
    pub fn accumulation_window(&self, index: usize, batches: usize) -> usize {
        let accum = self.gradient_accumulation_steps.max(1);
        let start = index / accum * accum;
        batches.saturating_sub(start).clamp(1, accum)
    }

    pub fn total_steps(&self, num_examples: usize) -> usize {
        self.max_steps
            .unwrap_or_else(|| self.steps_per_epoch(num_examples) * self.num_train_epochs)
    }

    pub fn should_log(&self, step: usize) -> bool {
        is_multiple(step, self.logging_steps)
    }

    pub fn should_evaluate(&self, step: usize) -> bool {
        is_multiple(step, self.eval_steps)
    }

    pub fn should_save(&self, step: usize) -> bool {
        is_multiple(step, self.save_steps)
    }
}

fn is_multiple(step: usize, every: usize) -> bool {
    every > 0 && step > 0 && step % every == 0
}
