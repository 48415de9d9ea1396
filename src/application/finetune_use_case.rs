// ============================================================
// Layer 2 — FineTuneUseCase
// ============================================================
// Fine-tunes a pretrained encoder as a sequence classifier:
//
//   Step 1: Load every split of the dataset       (Layer 4 - data)
//   Step 2: Load the tokenizer and model config   (Layer 6 - infra)
//   Step 3: Tokenize every split (pad + truncate) (Layer 4 - data)
//   Step 4: Load encoder weights, new head        (Layer 5 - ml)
//   Step 5: Train with accuracy reporting         (Layer 5 - ml)
//
// The tokenized length never exceeds the model's position
// embeddings.

use anyhow::{ensure, Context, Result};
use burn::backend::{Autodiff, Wgpu};
use burn::prelude::*;

use crate::data::{
    loader::{open_dataset, Columns},
    tokenize::{tokenize_dataset, Padding, TokenizeOptions},
};
use crate::infra::{
    device::DevicePlacement, hub::HubClient, tokenizer_store::TokenizerStore, weights::WeightStore,
};
use crate::ml::{
    distilbert::DistilBertConfig,
    metrics::{accuracy_metrics, argmax_logits},
    summary::ModelSummary,
    trainer::{TrainOutput, Trainer},
    training_args::{IntervalStrategy, TrainingArguments},
};

type TrainBackend = Autodiff<Wgpu>;

/// Used when neither the caller nor the tokenizer names a length.
const FALLBACK_MAX_LENGTH: usize = 512;

#[derive(Debug, Clone)]
pub struct FineTuneConfig {
    pub model: String,
    pub dataset: String,
    pub train_split: String,
    pub eval_split: String,
    /// Defaults to the tokenizer's `model_max_length`
    pub max_length: Option<usize>,
    pub padding: Padding,
    pub columns: Columns,
    pub device: DevicePlacement,
    pub training: TrainingArguments,
}

pub struct FineTuneUseCase {
    config: FineTuneConfig,
}

impl FineTuneUseCase {
    pub fn new(config: FineTuneConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<TrainOutput> {
        let cfg = &self.config;
        let hub = HubClient::new()?;

        // ── Step 1: dataset ───────────────────────────────────────────────────
        let source = open_dataset(&hub, &cfg.dataset, cfg.columns.clone());
        let mut required = vec![cfg.train_split.as_str()];
        if cfg.training.evaluation_strategy != IntervalStrategy::No {
            required.push(cfg.eval_split.as_str());
        }
        let dataset = source.load_all_splits(&required)?;
        println!("{dataset}");

        // ── Step 2: tokenizer + config ────────────────────────────────────────
        let repo = hub.model(&cfg.model);
        let tokenizer = TokenizerStore::new(&repo).load()?;
        println!("{tokenizer}");
        let model_config = DistilBertConfig::from_file(&repo.config()?)?;

        // ── Step 3: tokenize ──────────────────────────────────────────────────
        let max_length = resolve_max_length(
            cfg.max_length,
            tokenizer.model_max_length(),
            model_config.max_position_embeddings,
        )?;
        tracing::info!("Padding ({}) and truncating to {} tokens", cfg.padding, max_length);
        let options = TokenizeOptions { padding: cfg.padding, ..TokenizeOptions::max_length(max_length) };
        let mut tokenized = tokenize_dataset(&tokenizer, &dataset, &options)?;
        println!("{tokenized}");
        let train_dataset = tokenized
            .take_dataset(&cfg.train_split)
            .with_context(|| format!("Split '{}' is missing", cfg.train_split))?;
        let eval_dataset = tokenized.take_dataset(&cfg.eval_split);

        // ── Step 4: model ─────────────────────────────────────────────────────
        let device = cfg.device.wgpu_device();
        TrainBackend::seed(cfg.training.seed);

        let num_labels = dataset.num_labels().max(2);
        let store = WeightStore::open(&repo.weight_files()?)?;
        let model = model_config.load::<TrainBackend>(&store, num_labels, &device)?;
        println!(
            "{}",
            ModelSummary::new("DistilBertForSequenceClassification", &model_config, model.num_params())
        );
        tokenizer.check_model_vocab(model_config.vocab_size);

        // ── Step 5: train ─────────────────────────────────────────────────────
        let pad_id = tokenizer
            .pad_token_id()
            .unwrap_or(model_config.pad_token_id as u32);
        let mut trainer = Trainer::new(model, cfg.training.clone(), train_dataset, eval_dataset, device)?
            .with_pad_id(pad_id)
            .with_compute_metrics(accuracy_metrics())
            .with_preprocess_logits_for_metrics(Box::new(argmax_logits::<Wgpu>));

        let output = trainer.train()?;
        println!("{output}");
        Ok(output)
    }
}

/// Caller's length first, then the tokenizer's, then the fallback.
/// An explicit length beyond the model's positions is an error; an
/// inherited one is clamped.
fn resolve_max_length(requested: Option<usize>, tokenizer_max: Option<usize>, max_positions: usize) -> Result<usize> {
    if let Some(requested) = requested {
        ensure!(requested > 0, "max_length must be positive");
        ensure!(
            requested <= max_positions,
            "max_length {} exceeds the model's {} position embeddings",
            requested,
            max_positions
        );
        return Ok(requested);
    }
    let inherited = tokenizer_max.unwrap_or(FALLBACK_MAX_LENGTH);
    if inherited > max_positions {
        tracing::warn!(
            "Tokenizer allows {} tokens but the model has {} positions, using {}",
            inherited,
            max_positions,
            max_positions
        );
        return Ok(max_positions);
    }
    Ok(inherited)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_length_precedence() {
        assert_eq!(resolve_max_length(Some(128), Some(512), 512).unwrap(), 128);
        assert_eq!(resolve_max_length(None, Some(256), 512).unwrap(), 256);
        assert_eq!(resolve_max_length(None, None, 1024).unwrap(), FALLBACK_MAX_LENGTH);
    }

    #[test]
    fn test_max_length_is_bounded_by_positions() {
        let err = resolve_max_length(Some(1024), Some(512), 512).unwrap_err();
        assert!(err.to_string().contains("position embeddings"));
        assert!(resolve_max_length(Some(0), None, 512).is_err());
        // inherited lengths are clamped instead
        assert_eq!(resolve_max_length(None, Some(100_000), 512).unwrap(), 512);
        assert_eq!(resolve_max_length(None, None, 128).unwrap(), 128);
    }
}
