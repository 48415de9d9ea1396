// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves model weights, optimiser moments and trainer progress
// under the run's output directory. Records are written at full
// precision so a resumed run continues from the exact weights.
//
// Layout:
//   <output_dir>/
//     checkpoint-500/
//       model.mpk             ← model record
//       optimizer.mpk         ← AdamW moments
//       trainer_state.json    ← progress + log history
//       training_args.json    ← the arguments of the run
//     checkpoint-1000/
//     metrics.csv
//
// Directories are named by global step, so sorting them by
// the numeric suffix gives their age. When a save limit is
// set the oldest directories are removed after each save.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use burn::{
    module::AutodiffModule,
    optim::Optimizer,
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::ml::trainer_state::TrainerState;
use crate::ml::training_args::TrainingArguments;

const CHECKPOINT_PREFIX: &str = "checkpoint-";
const MODEL_FILE: &str = "model";
const OPTIMIZER_FILE: &str = "optimizer";

type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

pub struct CheckpointManager {
    dir: PathBuf,
    save_total_limit: Option<usize>,
}

impl CheckpointManager {
    /// Creates the output directory if it does not exist yet.
    pub fn new(dir: impl Into<PathBuf>, save_total_limit: Option<usize>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create output dir '{}'", dir.display()))?;
        Ok(Self { dir, save_total_limit })
    }

    /// Write `checkpoint-{global_step}` and rotate old ones.
    pub fn save<B: AutodiffBackend, M: AutodiffModule<B>, O: Optimizer<M, B>>(
        &self,
        model: &M,
        optimizer: &O,
        state: &TrainerState,
        args: &TrainingArguments,
    ) -> Result<PathBuf> {
        let ckpt_dir = self.dir.join(format!("{CHECKPOINT_PREFIX}{}", state.global_step));
        fs::create_dir_all(&ckpt_dir)
            .with_context(|| format!("Cannot create '{}'", ckpt_dir.display()))?;

        // Recorder appends its own extension
        let model_path = ckpt_dir.join(MODEL_FILE);
        model
            .clone()
            .save_file(model_path.clone(), &CheckpointRecorder::new())
            .with_context(|| format!("Failed to save model to '{}'", model_path.display()))?;
        let optimizer_path = ckpt_dir.join(OPTIMIZER_FILE);
        Recorder::<B>::record(&CheckpointRecorder::new(), optimizer.to_record(), optimizer_path.clone())
            .with_context(|| format!("Failed to save optimizer to '{}'", optimizer_path.display()))?;

        write_json(&ckpt_dir.join("trainer_state.json"), state)?;
        write_json(&ckpt_dir.join("training_args.json"), args)?;
        tracing::info!("Saving model checkpoint to {}", ckpt_dir.display());

        self.rotate()?;
        Ok(ckpt_dir)
    }

    /// Restore weights from a checkpoint directory into `model`.
    /// The architecture must match the one that was saved.
    pub fn load_model<B: Backend, M: Module<B>>(
        &self,
        model: M,
        checkpoint: &Path,
        device: &B::Device,
    ) -> Result<M> {
        let model_path = checkpoint.join(MODEL_FILE);
        model
            .load_file(model_path.clone(), &CheckpointRecorder::new(), device)
            .with_context(|| format!("Cannot load checkpoint '{}'", model_path.display()))
    }

    /// Restore optimiser moments saved next to the model.
    pub fn load_optimizer<B: AutodiffBackend, M: AutodiffModule<B>, O: Optimizer<M, B>>(
        &self,
        optimizer: O,
        checkpoint: &Path,
        device: &B::Device,
    ) -> Result<O> {
        let path = checkpoint.join(OPTIMIZER_FILE);
        let record = Recorder::<B>::load(&CheckpointRecorder::new(), path.clone(), device)
            .with_context(|| format!("Cannot load optimizer state '{}'", path.display()))?;
        Ok(optimizer.load_record(record))
    }

    pub fn load_state(&self, checkpoint: &Path) -> Result<TrainerState> {
        let path = checkpoint.join("trainer_state.json");
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Existing checkpoint directories, oldest first.
    pub fn checkpoints(&self) -> Result<Vec<PathBuf>> {
        let mut found: Vec<(usize, PathBuf)> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter_map(|path| {
                let step = path
                    .file_name()?
                    .to_str()?
                    .strip_prefix(CHECKPOINT_PREFIX)?
                    .parse::<usize>()
                    .ok()?;
                Some((step, path))
            })
            .collect();
        found.sort_by_key(|(step, _)| *step);
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }

    /// The checkpoint a resumed run starts from.
    pub fn latest_checkpoint(&self) -> Result<Option<PathBuf>> {
        Ok(self.checkpoints()?.pop())
    }

    fn rotate(&self) -> Result<()> {
        let Some(limit) = self.save_total_limit else {
            return Ok(());
        };
        let checkpoints = self.checkpoints()?;
        let excess = checkpoints.len().saturating_sub(limit.max(1));
        for old in checkpoints.into_iter().take(excess) {
            tracing::info!("Deleting older checkpoint [{}] due to save_total_limit", old.display());
            fs::remove_dir_all(&old)
                .with_context(|| format!("Cannot remove '{}'", old.display()))?;
        }
        Ok(())
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Cannot write '{}'", path.display()))
}
