//! Training loop over a TorchScript causal LM.
//!
//! The module must be exported with its parameters registered (so
//! `TrainableCModule` can bind them to a `VarStore`) and must take a
//! `[batch, seq]` int64 tensor of token ids, returning logits
//! `[batch, seq, vocab]` either bare or as the first tuple element.
//! For LoRA runs the exported graph already contains the adapter
//! projections; only those parameters are left trainable.

use std::path::Path;

use rand::{SeedableRng, rngs::StdRng};
use tch::{
    Device, IValue, Kind, Reduction, Tensor, TrainableCModule,
    nn::{self, OptimizerConfig},
};
use tracing::{debug, info};

use crate::{
    error::ServiceError,
    finetune::{
        args::{FineTuneMethod, TrainingArguments},
        checkpoint::{
            LogEntry, MODULE_FILE, TrainerState, WEIGHTS_FILE, checkpoint_dir, rotate_checkpoints,
            write_run_files,
        },
        encode::{Batch, DataCollator, EncodedExample, IGNORE_INDEX, batch_plan},
        schedule::LrSchedule,
    },
};

pub struct Trainer {
    args: TrainingArguments,
    vs: nn::VarStore,
    module: TrainableCModule,
    device: Device,
    trainable_parameters: usize,
    total_parameters: usize,
}

impl Trainer {
    pub fn new(
        args: TrainingArguments,
        module_path: &Path,
        device: Device,
        resume_from: Option<&Path>,
    ) -> Result<Self, ServiceError> {
        if !module_path.exists() {
            return Err(ServiceError::Other(format!(
                "model artifact missing: {}",
                module_path.display()
            )));
        }
        let mut vs = nn::VarStore::new(device);
        let module = TrainableCModule::load(module_path, vs.root())
            .map_err(|e| ServiceError::Training(e.to_string()))?;
        if let Some(dir) = resume_from {
            vs.load(dir.join(WEIGHTS_FILE))
                .map_err(|e| ServiceError::Training(format!("resume failed: {e}")))?;
        }

        let (trainable_parameters, total_parameters) = freeze_for_method(&vs, &args);
        info!(
            method = ?args.method,
            trainable_parameters,
            total_parameters,
            "prepared model for fine-tuning"
        );
        if trainable_parameters == 0 {
            return Err(ServiceError::Training(
                "no trainable parameters; LoRA runs need a module exported with lora_ adapters"
                    .into(),
            ));
        }

        Ok(Self {
            args,
            vs,
            module,
            device,
            trainable_parameters,
            total_parameters,
        })
    }

    pub fn train(
        &mut self,
        train: &[EncodedExample],
        eval: &[EncodedExample],
        collator: &DataCollator,
    ) -> Result<TrainerState, ServiceError> {
        if train.is_empty() {
            return Err(ServiceError::Training("training set is empty".into()));
        }
        let args = self.args.clone();
        let total_steps = args.total_steps(train.len());
        let schedule = LrSchedule::from_args(&args, total_steps);
        let mut opt = nn::AdamW {
            wd: args.weight_decay,
            ..Default::default()
        }
        .build(&self.vs, schedule.lr_at(0))
        .map_err(|e| ServiceError::Training(e.to_string()))?;

        let mut state = TrainerState {
            total_steps,
            trainable_parameters: self.trainable_parameters,
            total_parameters: self.total_parameters,
            ..TrainerState::default()
        };
        let lengths: Vec<usize> = train.iter().map(EncodedExample::len).collect();
        let mut rng = StdRng::seed_from_u64(args.seed);
        let mut running_loss = 0.0;
        let mut running_batches = 0usize;

        info!(
            examples = train.len(),
            eval_examples = eval.len(),
            total_steps,
            "starting training"
        );
        self.module.set_train();
        opt.zero_grad();

        'epochs: loop {
            let plan = batch_plan(
                &lengths,
                args.per_device_train_batch_size,
                args.group_by_length,
                &mut rng,
            );
            let batches = plan.len();
            for (index, indices) in plan.iter().enumerate() {
                let batch = collator.collate(indices.iter().map(|&i| &train[i]));
                let loss = self.batch_loss(&batch)?;
                let window = args.accumulation_window(index, batches);
                let scaled: Tensor = &loss / window as f64;
                scaled.backward();
                running_loss += loss.double_value(&[]);
                running_batches += 1;
                if !args.is_update_step(index, batches) {
                    continue;
                }

                let lr = schedule.lr_at(state.global_step);
                opt.set_lr(lr);
                if args.max_grad_norm > 0.0 {
                    opt.clip_grad_norm(args.max_grad_norm);
                }
                opt.step();
                opt.zero_grad();
                state.global_step += 1;
                let step = state.global_step;

                if args.should_log(step) {
                    let loss = running_loss / running_batches.max(1) as f64;
                    info!(step, epoch = state.epoch, loss, lr, "train");
                    state.log_history.push(LogEntry {
                        step,
                        epoch: state.epoch,
                        learning_rate: lr,
                        loss: Some(loss),
                        eval_loss: None,
                    });
                    running_loss = 0.0;
                    running_batches = 0;
                }
                if args.should_evaluate(step) && !eval.is_empty() {
                    let eval_loss = self.evaluate(eval, collator)?;
                    info!(step, eval_loss, "eval");
                    state.log_history.push(LogEntry {
                        step,
                        epoch: state.epoch,
                        learning_rate: lr,
                        loss: None,
                        eval_loss: Some(eval_loss),
                    });
                }
                if args.should_save(step) {
                    self.save(&checkpoint_dir(&args.output_dir, step), &state)?;
                    if let Some(limit) = args.save_total_limit {
                        rotate_checkpoints(&args.output_dir, limit)?;
                    }
                }
                if step >= total_steps {
                    break 'epochs;
                }
            }
            state.epoch += 1;
            if args.max_steps.is_none() && state.epoch >= args.num_train_epochs {
                break;
            }
        }

        self.module.set_eval();
        info!(global_step = state.global_step, "training finished");
        Ok(state)
    }

    /// Mean loss over the evaluation set, without gradients.
    pub fn evaluate(
        &mut self,
        eval: &[EncodedExample],
        collator: &DataCollator,
    ) -> Result<f64, ServiceError> {
        self.module.set_eval();
        let mut total = 0.0;
        let mut batches = 0usize;
        for chunk in eval.chunks(self.args.per_device_eval_batch_size) {
            let batch = collator.collate(chunk);
            let loss = tch::no_grad(|| self.batch_loss(&batch))?;
            total += loss.double_value(&[]);
            batches += 1;
        }
        self.module.set_train();
        Ok(total / batches.max(1) as f64)
    }

    /// Writes `model.pt`, `weights.ot` and the JSON run files into `dir`.
    pub fn save(&self, dir: &Path, state: &TrainerState) -> Result<(), ServiceError> {
        write_run_files(dir, &self.args, state)?;
        self.module
            .save(dir.join(MODULE_FILE))
            .map_err(|e| ServiceError::Training(e.to_string()))?;
        self.vs
            .save(dir.join(WEIGHTS_FILE))
            .map_err(|e| ServiceError::Training(e.to_string()))?;
        info!(path = %dir.display(), "checkpoint saved");
        Ok(())
    }

    fn batch_loss(&self, batch: &Batch) -> Result<Tensor, ServiceError> {
        let shape = [batch.batch_size as i64, batch.seq_len as i64];
        let input_ids = Tensor::from_slice(&batch.input_ids)
            .reshape(shape)
            .to(self.device);
        let labels = Tensor::from_slice(&batch.labels)
            .reshape(shape)
            .to(self.device);

        let logits = tch::autocast(self.args.fp16 && self.device.is_cuda(), || {
            self.module
                .forward_is(&[IValue::Tensor(input_ids)])
                .map_err(|e| ServiceError::Training(e.to_string()))
        })?;
        let logits = match logits {
            IValue::Tensor(t) => t,
            IValue::Tuple(ref items) if !items.is_empty() => match &items[0] {
                IValue::Tensor(t) => t.shallow_clone(),
                _ => {
                    return Err(ServiceError::Training(
                        "expected tensor as first tuple element".into(),
                    ));
                }
            },
            _ => return Err(ServiceError::Training("unexpected model output format".into())),
        };

        // position t predicts token t + 1
        let seq_len = batch.seq_len as i64;
        let vocab = logits.size().last().copied().unwrap_or(0);
        let shift_logits = logits.narrow(1, 0, seq_len - 1).to_kind(Kind::Float);
        let shift_labels = labels.narrow(1, 1, seq_len - 1);
        let loss = shift_logits.reshape([-1, vocab]).cross_entropy_loss::<Tensor>(
            &shift_labels.reshape([-1]),
            None,
            Reduction::Mean,
            IGNORE_INDEX,
            0.0,
        );
        debug!(loss = loss.double_value(&[]), "batch loss");
        Ok(loss)
    }
}

/// Applies the method's freezing policy. Returns `(trainable, total)`
/// parameter counts.
fn freeze_for_method(vs: &nn::VarStore, args: &TrainingArguments) -> (usize, usize) {
    let mut trainable = 0usize;
    let mut total = 0usize;
    for (name, tensor) in vs.variables() {
        let count = tensor.numel();
        total += count;
        let train_it = match args.method {
            FineTuneMethod::Full => true,
            FineTuneMethod::Lora => args.lora.is_adapter_parameter(&name),
        };
        let _ = tensor.set_requires_grad(train_it);
        if train_it {
            trainable += count;
        }
    }
    (trainable, total)
}
