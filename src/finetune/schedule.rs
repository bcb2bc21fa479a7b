use crate::finetune::args::{SchedulerKind, TrainingArguments};

/// Learning rate as a function of the optimizer step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LrSchedule {
    pub base_lr: f64,
    pub warmup_steps: usize,
    pub total_steps: usize,
    pub kind: SchedulerKind,
}

impl LrSchedule {
    pub fn from_args(args: &TrainingArguments, total_steps: usize) -> Self {
        Self {
            base_lr: args.learning_rate,
            warmup_steps: args.warmup_steps,
            total_steps,
            kind: args.lr_scheduler_type,
        }
    }

    /// Rate applied for the update that takes the model from `step` to
    /// `step + 1`.
    pub fn lr_at(&self, step: usize) -> f64 {
        if self.kind == SchedulerKind::Constant {
            return self.base_lr;
        }
        if step < self.warmup_steps {
            return self.base_lr * step as f64 / self.warmup_steps.max(1) as f64;
        }
        match self.kind {
            SchedulerKind::Linear => {
                let remaining = self.total_steps.saturating_sub(step) as f64;
                let span = self.total_steps.saturating_sub(self.warmup_steps).max(1) as f64;
                self.base_lr * (remaining / span).max(0.0)
            }
            _ => self.base_lr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(kind: SchedulerKind) -> LrSchedule {
        LrSchedule {
            base_lr: 1.0,
            warmup_steps: 10,
            total_steps: 110,
            kind,
        }
    }

    #[test]
    fn linear_warms_up_then_decays_to_zero() {
        let s = schedule(SchedulerKind::Linear);
        assert_eq!(s.lr_at(0), 0.0);
        assert_eq!(s.lr_at(5), 0.5);
        assert_eq!(s.lr_at(10), 1.0);
        assert_eq!(s.lr_at(60), 0.5);
        assert_eq!(s.lr_at(110), 0.0);
        assert_eq!(s.lr_at(500), 0.0);
    }

    #[test]
    fn constant_with_warmup_plateaus() {
        let s = schedule(SchedulerKind::ConstantWithWarmup);
        assert_eq!(s.lr_at(5), 0.5);
        assert_eq!(s.lr_at(100), 1.0);
    }

    #[test]
    fn constant_ignores_warmup() {
        assert_eq!(schedule(SchedulerKind::Constant).lr_at(0), 1.0);
    }
}
