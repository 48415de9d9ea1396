// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Appends one CSV row per evaluation report so learning curves
// can be plotted without parsing trainer_state.json.
//
// Output file: <output_dir>/metrics.csv
//
//   epoch,step,train_loss,eval_loss,eval_accuracy
//   1.00,1067,0.412345,0.351200,0.846154
//   2.00,2134,0.250112,0.372900,0.851782
//
// train_loss is the mean since the previous report; a metric
// that was not computed is written as an empty cell.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

const HEADER: &str = "epoch,step,train_loss,eval_loss,eval_accuracy";

/// One evaluation report reduced to the columns of the CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRecord {
    pub epoch: f64,
    pub step: usize,
    pub train_loss: Option<f64>,
    pub eval_loss: f64,
    pub eval_accuracy: Option<f64>,
}

impl EvalRecord {
    /// True when this report's loss beats the best one so far.
    pub fn is_improvement(&self, best_eval_loss: Option<f64>) -> bool {
        best_eval_loss.map_or(true, |best| self.eval_loss < best)
    }
}

pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the header if the file is new, otherwise appends.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }
        Ok(Self { csv_path })
    }

    pub fn log(&self, record: &EvalRecord) -> Result<()> {
        let mut f = OpenOptions::new().append(true).open(&self.csv_path)?;
        let cell = |v: Option<f64>| v.map(|v| format!("{v:.6}")).unwrap_or_default();
        writeln!(
            f,
            "{:.2},{},{},{:.6},{}",
            record.epoch,
            record.step,
            cell(record.train_loss),
            record.eval_loss,
            cell(record.eval_accuracy),
        )?;

        tracing::debug!(
            "Logged step {} metrics: eval_loss={:.4}",
            record.step,
            record.eval_loss
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
