// ============================================================
// Layer 5 — Evaluation Metrics
// ============================================================
// Evaluation collects every prediction of the eval split and
// hands them to a `compute_metrics` callback together with the
// reference labels. Predictions arrive either as raw logits or,
// when a preprocessing hook ran on device, as class ids.
//
// The hook keeps host memory flat: for a classifier only the
// argmax leaves the device instead of the full logit matrix.

use anyhow::Result;
use burn::prelude::*;
use std::collections::BTreeMap;

use crate::error::MetricError;

/// Reduces logits on device before they are gathered.
/// Receives the batch logits and labels, returns one class id per row.
pub type PreprocessLogits<B> = Box<dyn Fn(Tensor<B, 2>, Tensor<B, 1, Int>) -> Tensor<B, 1, Int>>;

/// Turns gathered predictions into named scalars (without the `eval_` prefix).
pub type ComputeMetrics = Box<dyn Fn(&EvalPrediction) -> Result<BTreeMap<String, f64>>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Predictions {
    /// One logit row per example
    Logits(Vec<Vec<f32>>),
    /// Output of the preprocessing hook
    Classes(Vec<i64>),
}

impl Predictions {
    /// Class ids, taking the argmax of each row when still logits.
    pub fn class_ids(&self) -> Vec<i64> {
        match self {
            Self::Classes(ids) => ids.clone(),
            Self::Logits(rows) => rows.iter().map(|row| argmax(row) as i64).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvalPrediction {
    pub predictions: Predictions,
    pub label_ids: Vec<i64>,
}

/// Index of the largest value; the first one wins ties.
pub fn argmax(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

/// Preprocessing hook for classifiers: argmax over the class axis.
pub fn argmax_logits<B: Backend>(logits: Tensor<B, 2>, _labels: Tensor<B, 1, Int>) -> Tensor<B, 1, Int> {
    let [batch, _] = logits.dims();
    logits.argmax(1).reshape([batch])
}

/// Fraction of predictions equal to their reference.
pub fn accuracy(predictions: &[i64], references: &[i64]) -> Result<f64, MetricError> {
    if predictions.len() != references.len() {
        return Err(MetricError::LengthMismatch {
            predictions: predictions.len(),
            references: references.len(),
        });
    }
    if predictions.is_empty() {
        return Err(MetricError::EmptyInput);
    }
    let correct = predictions.iter().zip(references).filter(|(p, r)| p == r).count();
    Ok(correct as f64 / predictions.len() as f64)
}

/// `compute_metrics` callback reporting `accuracy`.
pub fn accuracy_metrics() -> ComputeMetrics {
    Box::new(|eval: &EvalPrediction| {
        let score = accuracy(&eval.predictions.class_ids(), &eval.label_ids)?;
        Ok(BTreeMap::from([("accuracy".to_string(), score)]))
    })
}
