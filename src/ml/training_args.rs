// ============================================================
// Layer 5 — Training Arguments
// ============================================================
// Plain record of scalar options consumed once when the
// trainer is constructed. Defaults follow the conventions of
// the hub's trainer so a run configured with only an output
// dir and an evaluation strategy behaves the same way.
//
// Serialisable so every checkpoint can carry a copy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// When a periodic action (evaluation, checkpointing) fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalStrategy {
    No,
    Steps,
    Epoch,
}

impl FromStr for IntervalStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "no" => Ok(Self::No),
            "steps" => Ok(Self::Steps),
            "epoch" => Ok(Self::Epoch),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for IntervalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::No => "no",
            Self::Steps => "steps",
            Self::Epoch => "epoch",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingArguments {
    /// Where checkpoints, logs and metrics land
    pub output_dir: String,

    pub evaluation_strategy: IntervalStrategy,
    /// Evaluation interval for the `steps` strategy; falls back to `logging_steps`
    pub eval_steps: Option<usize>,

    pub save_strategy: IntervalStrategy,
    pub save_steps: usize,
    /// Keep at most this many checkpoints, deleting the oldest
    pub save_total_limit: Option<usize>,

    /// Emit a training log entry every N optimiser steps (0 disables)
    pub logging_steps: usize,

    pub learning_rate: f64,
    pub num_train_epochs: usize,
    pub per_device_train_batch_size: usize,
    pub per_device_eval_batch_size: usize,
    pub warmup_steps: usize,

    // AdamW
    pub weight_decay: f32,
    pub adam_beta1: f32,
    pub adam_beta2: f32,
    pub adam_epsilon: f32,
    pub max_grad_norm: f32,

    pub seed: u64,
    pub dataloader_num_workers: usize,

    /// Continue from the newest checkpoint in `output_dir`
    #[serde(default)]
    pub resume_from_checkpoint: bool,
}

impl Default for TrainingArguments {
    fn default() -> Self {
        Self {
            output_dir: "test_trainer".to_string(),
            evaluation_strategy: IntervalStrategy::No,
            eval_steps: None,
            save_strategy: IntervalStrategy::Steps,
            save_steps: 500,
            save_total_limit: None,
            logging_steps: 500,
            learning_rate: 5e-5,
            num_train_epochs: 3,
            per_device_train_batch_size: 8,
            per_device_eval_batch_size: 8,
            warmup_steps: 0,
            weight_decay: 0.0,
            adam_beta1: 0.9,
            adam_beta2: 0.999,
            adam_epsilon: 1e-8,
            max_grad_norm: 1.0,
            seed: 42,
            dataloader_num_workers: 1,
            resume_from_checkpoint: false,
        }
    }
}

impl TrainingArguments {
    pub fn new(output_dir: impl Into<String>, evaluation_strategy: IntervalStrategy) -> Self {
        Self {
            output_dir: output_dir.into(),
            evaluation_strategy,
            ..Self::default()
        }
    }

    pub fn eval_interval(&self) -> usize {
        self.eval_steps.unwrap_or(self.logging_steps)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.evaluation_strategy == IntervalStrategy::Steps && self.eval_interval() == 0 {
            return Err(ConfigError::ZeroStepInterval);
        }
        if self.save_strategy == IntervalStrategy::Steps && self.save_steps == 0 {
            return Err(ConfigError::ZeroStepInterval);
        }
        Ok(())
    }

    /// Linear warmup then linear decay to zero over `total_steps`.
    /// `step` counts optimiser updates already applied.
    pub fn learning_rate_at(&self, step: usize, total_steps: usize) -> f64 {
        if step < self.warmup_steps {
            return self.learning_rate * step as f64 / self.warmup_steps.max(1) as f64;
        }
        let decay_steps = total_steps.saturating_sub(self.warmup_steps).max(1);
        let remaining = total_steps.saturating_sub(step);
        self.learning_rate * remaining as f64 / decay_steps as f64
    }
}
