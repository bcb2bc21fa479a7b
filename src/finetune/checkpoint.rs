use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    error::ServiceError,
    finetune::args::{FineTuneMethod, TrainingArguments},
};

pub const CHECKPOINT_PREFIX: &str = "checkpoint-";
pub const MODULE_FILE: &str = "model.pt";
pub const WEIGHTS_FILE: &str = "weights.ot";
pub const TRAINING_ARGS_FILE: &str = "training_args.json";
pub const TRAINER_STATE_FILE: &str = "trainer_state.json";
pub const ADAPTER_CONFIG_FILE: &str = "adapter_config.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub step: usize,
    pub epoch: usize,
    pub learning_rate: f64,
    pub loss: Option<f64>,
    pub eval_loss: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    pub global_step: usize,
    pub epoch: usize,
    pub total_steps: usize,
    pub trainable_parameters: usize,
    pub total_parameters: usize,
    pub log_history: Vec<LogEntry>,
}

impl TrainerState {
    pub fn last_train_loss(&self) -> Option<f64> {
        self.log_history.iter().rev().find_map(|e| e.loss)
    }

    pub fn last_eval_loss(&self) -> Option<f64> {
        self.log_history.iter().rev().find_map(|e| e.eval_loss)
    }
}

pub fn checkpoint_dir(output_dir: &Path, step: usize) -> PathBuf {
    output_dir.join(format!("{CHECKPOINT_PREFIX}{step}"))
}

/// Writes the JSON side files that accompany saved weights.
pub fn write_run_files(
    dir: &Path,
    args: &TrainingArguments,
    state: &TrainerState,
) -> Result<(), ServiceError> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join(TRAINING_ARGS_FILE), serde_json::to_vec_pretty(args)?)?;
    fs::write(dir.join(TRAINER_STATE_FILE), serde_json::to_vec_pretty(state)?)?;
    if args.method == FineTuneMethod::Lora {
        fs::write(
            dir.join(ADAPTER_CONFIG_FILE),
            serde_json::to_vec_pretty(&args.lora)?,
        )?;
    }
    Ok(())
}

pub fn read_trainer_state(dir: &Path) -> Result<TrainerState, ServiceError> {
    let raw = fs::read_to_string(dir.join(TRAINER_STATE_FILE))?;
    Ok(serde_json::from_str(&raw)?)
}

/// Deletes the oldest `checkpoint-N` directories so at most `limit` remain.
/// Returns the removed paths.
pub fn rotate_checkpoints(output_dir: &Path, limit: usize) -> Result<Vec<PathBuf>, ServiceError> {
    let mut checkpoints: Vec<(usize, PathBuf)> = Vec::new();
    for entry in fs::read_dir(output_dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let step = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(CHECKPOINT_PREFIX))
            .and_then(|n| n.parse::<usize>().ok());
        if let Some(step) = step {
            checkpoints.push((step, path));
        }
    }
    checkpoints.sort_by_key(|(step, _)| *step);

    let excess = checkpoints.len().saturating_sub(limit);
    let mut removed = Vec::with_capacity(excess);
    for (_, path) in checkpoints.into_iter().take(excess) {
        info!(path = %path.display(), "removing old checkpoint");
        fs::remove_dir_all(&path)?;
        removed.push(path);
    }
    Ok(removed)
}

/// Returns the checkpoint to resume from, if one was requested and exists.
pub fn resolve_resume(requested: Option<&Path>) -> Option<PathBuf> {
    let path = requested?;
    if path.exists() {
        info!(path = %path.display(), "resuming from checkpoint");
        Some(path.to_path_buf())
    } else {
        warn!(path = %path.display(), "checkpoint not found, training from scratch");
        None
    }
}
