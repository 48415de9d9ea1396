// ============================================================
// Layer 5 — Trainer State
// ============================================================
// Progress record written into every checkpoint as
// trainer_state.json. `log_history` holds one entry per
// training log, evaluation report and final summary, in the
// order they were produced.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One line of the log history: the position in training plus
/// whatever scalars were reported at that point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Fractional epoch, e.g. 1.5 half way through the second epoch
    pub epoch: f64,
    pub step: usize,
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

impl LogEntry {
    pub fn new(epoch: f64, step: usize, values: BTreeMap<String, f64>) -> Self {
        Self { epoch, step, values }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Evaluation reports are the entries carrying `eval_loss`.
    pub fn is_eval(&self) -> bool {
        self.values.contains_key("eval_loss")
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (key, value) in &self.values {
            write!(f, "'{key}': {value:.6}, ")?;
        }
        write!(f, "'epoch': {:.2}}}", self.epoch)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    pub epoch: f64,
    pub global_step: usize,
    pub max_steps: usize,
    pub num_train_epochs: usize,
    pub train_batch_size: usize,
    /// Lowest eval_loss seen so far
    pub best_metric: Option<f64>,
    pub log_history: Vec<LogEntry>,
}

impl TrainerState {
    pub fn eval_reports(&self) -> impl Iterator<Item = &LogEntry> {
        self.log_history.iter().filter(|entry| entry.is_eval())
    }
}
