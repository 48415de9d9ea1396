// ============================================================
// Layer 5 — Trainer
// ============================================================
// Fine-tuning loop for sequence classifiers using Burn's
// DataLoader and AdamW.
//
//   for each epoch:
//     for each shuffled batch:
//       logits → cross-entropy → backward → clip → AdamW step
//       every logging_steps → training log entry
//       evaluation_strategy = steps → evaluate every eval_steps
//       save_strategy = steps       → checkpoint every save_steps
//     evaluation_strategy = epoch → evaluate
//     save_strategy = epoch       → checkpoint
//
// With resume_from_checkpoint the newest checkpoint restores the
// weights, the AdamW moments and the step counter; batches that
// were already trained on are skipped.
//
// Burn split:
//   - training runs on B (autodiff) for gradients
//   - model.valid() moves the model to B::InnerBackend with
//     dropout disabled, and evaluation batches are built there
//
// Reference: Burn Book §5, Loshchilov & Hutter (2019) AdamW

use anyhow::{bail, ensure, Context, Result};
use burn::{
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    grad_clipping::GradientClippingConfig,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamWConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::data::{batcher::ClassificationBatcher, dataset::ClassificationDataset};
use crate::infra::checkpoint::CheckpointManager;
use crate::infra::metrics::{EvalRecord, MetricsLogger};
use crate::ml::distilbert::DistilBertForSequenceClassification;
use crate::ml::metrics::{ComputeMetrics, EvalPrediction, PreprocessLogits, Predictions};
use crate::ml::trainer_state::{LogEntry, TrainerState};
use crate::ml::training_args::{IntervalStrategy, TrainingArguments};

/// A model mapping token ids + attention mask to class logits.
pub trait SequenceClassifier<B: Backend> {
    /// [batch, seq] → [batch, num_labels]
    fn logits(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2>;

    /// Longest sequence the position embeddings cover.
    fn max_positions(&self) -> usize;

    /// Mean cross-entropy against `labels` [batch], plus the logits.
    fn loss(
        &self,
        input_ids: Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
        labels: Tensor<B, 1, Int>,
    ) -> (Tensor<B, 1>, Tensor<B, 2>) {
        let logits = self.logits(input_ids, attention_mask);
        let loss = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), labels);
        (loss, logits)
    }
}

impl<B: Backend> SequenceClassifier<B> for DistilBertForSequenceClassification<B> {
    fn logits(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        self.forward(input_ids, attention_mask)
    }

    fn max_positions(&self) -> usize {
        self.distilbert.max_positions()
    }
}

/// What `train()` returns.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOutput {
    pub global_step: usize,
    /// Mean loss over every optimiser step
    pub training_loss: f64,
    pub metrics: BTreeMap<String, f64>,
    pub log_history: Vec<LogEntry>,
}

impl fmt::Display for TrainOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metrics: Vec<String> = self.metrics.iter().map(|(k, v)| format!("'{k}': {v:.6}")).collect();
        write!(
            f,
            "TrainOutput(global_step={}, training_loss={:.6}, metrics={{{}}})",
            self.global_step,
            self.training_loss,
            metrics.join(", ")
        )
    }
}

pub struct Trainer<B: AutodiffBackend, M> {
    model: M,
    args: TrainingArguments,
    train_dataset: Arc<ClassificationDataset>,
    eval_dataset: Option<Arc<ClassificationDataset>>,
    pad_id: u32,
    compute_metrics: Option<ComputeMetrics>,
    preprocess_logits_for_metrics: Option<PreprocessLogits<B::InnerBackend>>,
    device: B::Device,
    state: TrainerState,
}

/// Running sums between two training log entries (or evaluations).
#[derive(Default)]
struct LossWindow {
    sum: f64,
    steps: usize,
}

impl LossWindow {
    fn push(&mut self, loss: f64) {
        self.sum += loss;
        self.steps += 1;
    }

    /// Mean since the last take, then reset.
    fn take(&mut self) -> Option<f64> {
        let mean = (self.steps > 0).then(|| self.sum / self.steps as f64);
        *self = Self::default();
        mean
    }
}

impl<B, M> Trainer<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SequenceClassifier<B>,
    M::InnerModule: SequenceClassifier<B::InnerBackend>,
{
    pub fn new(
        model: M,
        args: TrainingArguments,
        train_dataset: ClassificationDataset,
        eval_dataset: Option<ClassificationDataset>,
        device: B::Device,
    ) -> Result<Self> {
        args.validate()?;
        if args.evaluation_strategy != IntervalStrategy::No && eval_dataset.is_none() {
            bail!("evaluation_strategy '{}' requires an eval dataset", args.evaluation_strategy);
        }
        let longest = eval_dataset
            .iter()
            .map(ClassificationDataset::max_seq_len)
            .fold(train_dataset.max_seq_len(), usize::max);
        ensure!(
            longest <= model.max_positions(),
            "Sequences of {} tokens exceed the model's {} position embeddings",
            longest,
            model.max_positions()
        );
        Ok(Self {
            model,
            args,
            train_dataset: Arc::new(train_dataset),
            eval_dataset: eval_dataset.map(Arc::new),
            pad_id: 0,
            compute_metrics: None,
            preprocess_logits_for_metrics: None,
            device,
            state: TrainerState::default(),
        })
    }

    pub fn with_pad_id(mut self, pad_id: u32) -> Self {
        self.pad_id = pad_id;
        self
    }

    pub fn with_compute_metrics(mut self, compute_metrics: ComputeMetrics) -> Self {
        self.compute_metrics = Some(compute_metrics);
        self
    }

    pub fn with_preprocess_logits_for_metrics(mut self, preprocess: PreprocessLogits<B::InnerBackend>) -> Self {
        self.preprocess_logits_for_metrics = Some(preprocess);
        self
    }

    pub fn state(&self) -> &TrainerState {
        &self.state
    }

    pub fn train(&mut self) -> Result<TrainOutput> {
        let args = self.args.clone();
        let num_examples = self.train_dataset.len();
        ensure!(num_examples > 0, "The training dataset is empty");
        ensure!(args.per_device_train_batch_size > 0, "per_device_train_batch_size must be positive");

        let steps_per_epoch = num_examples.div_ceil(args.per_device_train_batch_size);
        let max_steps = steps_per_epoch * args.num_train_epochs;

        B::seed(args.seed);
        let checkpoints = CheckpointManager::new(&args.output_dir, args.save_total_limit)?;
        let metrics_log = MetricsLogger::new(&args.output_dir)?;
        self.state = TrainerState {
            max_steps,
            num_train_epochs: args.num_train_epochs,
            train_batch_size: args.per_device_train_batch_size,
            ..Default::default()
        };

        tracing::info!("***** Running training *****");
        tracing::info!("  Num examples = {}", num_examples);
        tracing::info!("  Num epochs = {}", args.num_train_epochs);
        tracing::info!("  Batch size = {}", args.per_device_train_batch_size);
        tracing::info!("  Total optimization steps = {}", max_steps);

        // ── AdamW with global-norm clipping ───────────────────────────────────
        let mut optim = AdamWConfig::new()
            .with_beta_1(args.adam_beta1)
            .with_beta_2(args.adam_beta2)
            .with_epsilon(args.adam_epsilon)
            .with_weight_decay(args.weight_decay)
            .with_grad_clipping(Some(GradientClippingConfig::Norm(args.max_grad_norm)))
            .init::<B, M>();

        let train_loader = DataLoaderBuilder::new(ClassificationBatcher::<B>::new(self.device.clone(), self.pad_id))
            .batch_size(args.per_device_train_batch_size)
            .shuffle(args.seed)
            .num_workers(args.dataloader_num_workers)
            .build(self.train_dataset.clone());

        let mut model = self.model.clone();
        if args.resume_from_checkpoint {
            match checkpoints.latest_checkpoint()? {
                Some(checkpoint) => {
                    model = checkpoints.load_model::<B, M>(model, &checkpoint, &self.device)?;
                    optim = checkpoints.load_optimizer::<B, M, _>(optim, &checkpoint, &self.device)?;
                    let restored = checkpoints.load_state(&checkpoint)?;
                    tracing::info!(
                        "Resuming from '{}' at step {}",
                        checkpoint.display(),
                        restored.global_step
                    );
                    self.state.global_step = restored.global_step.min(max_steps);
                    self.state.epoch = restored.epoch;
                    self.state.best_metric = restored.best_metric;
                    self.state.log_history = restored.log_history;
                }
                None => tracing::warn!(
                    "No checkpoint in '{}' to resume from, training from scratch",
                    args.output_dir
                ),
            }
        }
        let epochs_trained = self.state.global_step / steps_per_epoch;
        let skip_in_epoch = self.state.global_step % steps_per_epoch;

        let started = Instant::now();
        let mut steps_run = 0usize;
        let mut total_loss = 0.0f64;
        let mut log_window = LossWindow::default();
        let mut eval_window = LossWindow::default();

        for epoch in epochs_trained..args.num_train_epochs {
            for (step_in_epoch, batch) in train_loader.iter().enumerate() {
                if epoch == epochs_trained && step_in_epoch < skip_in_epoch {
                    continue;
                }
                let (loss, _) = model.loss(batch.input_ids, batch.attention_mask, batch.labels);

                let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
                steps_run += 1;
                total_loss += loss_val;
                log_window.push(loss_val);
                eval_window.push(loss_val);

                let lr = args.learning_rate_at(self.state.global_step, max_steps);
                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optim.step(lr, model, grads);

                self.state.global_step += 1;
                self.state.epoch = epoch as f64 + (step_in_epoch + 1) as f64 / steps_per_epoch as f64;
                let step = self.state.global_step;

                if args.logging_steps > 0 && step % args.logging_steps == 0 {
                    if let Some(mean) = log_window.take() {
                        let values = BTreeMap::from([
                            ("loss".to_string(), mean),
                            ("learning_rate".to_string(), args.learning_rate_at(step, max_steps)),
                        ]);
                        self.log(values);
                    }
                }
                if args.evaluation_strategy == IntervalStrategy::Steps && step % args.eval_interval() == 0 {
                    self.run_evaluation(&model, eval_window.take(), &metrics_log)?;
                }
                if args.save_strategy == IntervalStrategy::Steps && step % args.save_steps == 0 {
                    checkpoints.save::<B, M, _>(&model, &optim, &self.state, &args)?;
                }
            }

            self.state.epoch = (epoch + 1) as f64;
            if args.evaluation_strategy == IntervalStrategy::Epoch {
                self.run_evaluation(&model, eval_window.take(), &metrics_log)?;
            }
            if args.save_strategy == IntervalStrategy::Epoch {
                checkpoints.save::<B, M, _>(&model, &optim, &self.state, &args)?;
            }
        }

        let runtime = started.elapsed().as_secs_f64();
        let global_step = self.state.global_step;
        let training_loss = total_loss / steps_run.max(1) as f64;
        let metrics = BTreeMap::from([
            ("train_runtime".to_string(), runtime),
            (
                "train_samples_per_second".to_string(),
                (num_examples * args.num_train_epochs) as f64 / runtime.max(f64::EPSILON),
            ),
            ("train_steps_per_second".to_string(), steps_run as f64 / runtime.max(f64::EPSILON)),
            ("train_loss".to_string(), training_loss),
        ]);
        self.log(metrics.clone());
        tracing::info!("Training completed in {:.1}s", runtime);
        if let Some(last) = self.state.eval_reports().last() {
            tracing::info!(
                "Last evaluation at step {} (eval_loss {:.4}), history in {}",
                last.step,
                last.get("eval_loss").unwrap_or(f64::NAN),
                metrics_log.csv_path().display()
            );
        }

        self.model = model;
        Ok(TrainOutput {
            global_step,
            training_loss,
            metrics,
            log_history: self.state.log_history.clone(),
        })
    }

    fn log(&mut self, values: BTreeMap<String, f64>) {
        let entry = LogEntry::new(self.state.epoch, self.state.global_step, values);
        println!("{entry}");
        tracing::debug!("step {}: {}", entry.step, entry);
        self.state.log_history.push(entry);
    }

    fn run_evaluation(&mut self, model: &M, train_loss: Option<f64>, metrics_log: &MetricsLogger) -> Result<()> {
        let metrics = self.evaluate_model(&model.valid())?;
        let record = EvalRecord {
            epoch: self.state.epoch,
            step: self.state.global_step,
            train_loss,
            eval_loss: metrics.get("eval_loss").copied().unwrap_or(f64::NAN),
            eval_accuracy: metrics.get("eval_accuracy").copied(),
        };
        if record.is_improvement(self.state.best_metric) {
            self.state.best_metric = Some(record.eval_loss);
        }
        metrics_log.log(&record)?;
        self.log(metrics);
        Ok(())
    }

    fn evaluate_model(&self, model: &M::InnerModule) -> Result<BTreeMap<String, f64>> {
        let dataset = self.eval_dataset.clone().context("No eval dataset was given to the trainer")?;
        let num_examples = dataset.len();
        let loader = DataLoaderBuilder::new(ClassificationBatcher::<B::InnerBackend>::new(
            self.device.clone(),
            self.pad_id,
        ))
        .batch_size(self.args.per_device_eval_batch_size)
        .num_workers(self.args.dataloader_num_workers)
        .build(dataset);

        tracing::info!("***** Running Evaluation *****");
        tracing::info!("  Num examples = {}", num_examples);

        let started = Instant::now();
        let mut loss_sum = 0.0f64;
        let mut seen = 0usize;
        let mut label_ids: Vec<i64> = Vec::with_capacity(num_examples);
        let mut classes: Vec<i64> = Vec::new();
        let mut rows: Vec<Vec<f32>> = Vec::new();

        for batch in loader.iter() {
            let batch_size = batch.labels.dims()[0];
            let (loss, logits) = model.loss(batch.input_ids, batch.attention_mask, batch.labels.clone());
            let loss: f64 = loss.into_scalar().elem::<f64>();
            loss_sum += loss * batch_size as f64;
            seen += batch_size;

            // labels travel with their batch; worker order is not fixed
            label_ids.extend(batch.labels.clone().into_data().iter::<i64>());
            match &self.preprocess_logits_for_metrics {
                Some(preprocess) => {
                    classes.extend(preprocess(logits, batch.labels).into_data().iter::<i64>());
                }
                None => {
                    let [_, num_labels] = logits.dims();
                    let values: Vec<f32> = logits.into_data().iter::<f32>().collect();
                    rows.extend(values.chunks(num_labels).map(<[f32]>::to_vec));
                }
            }
        }
        ensure!(seen > 0, "The eval dataset is empty");

        let predictions = if self.preprocess_logits_for_metrics.is_some() {
            Predictions::Classes(classes)
        } else {
            Predictions::Logits(rows)
        };

        let mut metrics = BTreeMap::from([("eval_loss".to_string(), loss_sum / seen as f64)]);
        if let Some(compute) = &self.compute_metrics {
            let computed = compute(&EvalPrediction { predictions, label_ids })?;
            metrics.extend(computed.into_iter().map(|(k, v)| (format!("eval_{k}"), v)));
        }
        let runtime = started.elapsed().as_secs_f64();
        metrics.insert("eval_runtime".to_string(), runtime);
        metrics.insert("eval_samples_per_second".to_string(), seen as f64 / runtime.max(f64::EPSILON));
        Ok(metrics)
    }
}
