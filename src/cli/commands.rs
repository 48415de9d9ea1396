// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `generate` and `fine-tune`,
// and all their flags. Every flag has a default so both
// commands run without arguments.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{ArgAction, Args, Subcommand};

use crate::application::{finetune_use_case::FineTuneConfig, generate_use_case::GenerateConfig};
use crate::data::{loader::Columns, tokenize::Padding};
use crate::infra::device::DevicePlacement;
use crate::ml::generation::config::GenerationOverrides;
use crate::ml::training_args::{IntervalStrategy, TrainingArguments};

const DEFAULT_PROMPT: &str =
    "What is the answer to the ultimate question of life, the universe, and everything?";

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate text from a prompt with a pretrained causal LM
    Generate(GenerateArgs),

    /// Fine-tune an encoder as a sequence classifier
    FineTune(FineTuneArgs),
}

/// All arguments for the `generate` command.
#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Hub repository id or local model directory
    #[arg(long, default_value = "meta-llama/Llama-2-7b-chat-hf")]
    pub model: String,

    #[arg(long, default_value = DEFAULT_PROMPT)]
    pub prompt: String,

    /// Upper bound on generated tokens per sequence
    #[arg(long, default_value_t = 100)]
    pub max_new_tokens: usize,

    /// Beam width; above 1 enables beam search
    #[arg(long, default_value_t = 2)]
    pub num_beams: usize,

    /// Keep only the k most likely tokens when sampling (0 disables)
    #[arg(long, default_value_t = 2)]
    pub top_k: usize,

    /// Nucleus threshold in (0, 1]
    #[arg(long, default_value_t = 0.8)]
    pub top_p: f32,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub do_sample: bool,

    #[arg(long, default_value_t = 2)]
    pub num_return_sequences: usize,

    /// Stop beam search once num_beams hypotheses are finished
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub early_stopping: bool,

    #[arg(long)]
    pub temperature: Option<f32>,

    /// Exponent applied to the length when scoring finished beams
    #[arg(long)]
    pub length_penalty: Option<f32>,

    /// RNG seed for sampling
    #[arg(long)]
    pub seed: Option<u64>,

    /// auto, cpu or gpu:<index>
    #[arg(long, default_value_t = DevicePlacement::Auto)]
    pub device: DevicePlacement,
}

/// Only the flags below are layered over the model's own
/// generation_config.json; unset optionals keep its values.
impl From<GenerateArgs> for GenerateConfig {
    fn from(a: GenerateArgs) -> Self {
        GenerateConfig {
            model: a.model,
            prompt: a.prompt,
            options: GenerationOverrides {
                max_new_tokens: Some(a.max_new_tokens),
                num_beams: Some(a.num_beams),
                top_k: Some(a.top_k),
                top_p: Some(a.top_p),
                temperature: a.temperature,
                do_sample: Some(a.do_sample),
                num_return_sequences: Some(a.num_return_sequences),
                early_stopping: Some(a.early_stopping),
                length_penalty: a.length_penalty,
                seed: a.seed,
                ..Default::default()
            },
            device: a.device,
        }
    }
}

/// All arguments for the `fine-tune` command.
#[derive(Args, Debug)]
pub struct FineTuneArgs {
    /// Hub dataset id or local directory with <split>.parquet / <split>.jsonl
    #[arg(long, default_value = "rotten_tomatoes")]
    pub dataset: String,

    /// Hub repository id or local model directory
    #[arg(long, default_value = "distilbert-base-uncased")]
    pub model: String,

    #[arg(long, default_value = "train")]
    pub train_split: String,

    #[arg(long, default_value = "test")]
    pub eval_split: String,

    #[arg(long, default_value = "text")]
    pub text_column: String,

    #[arg(long, default_value = "label")]
    pub label_column: String,

    /// Pad / truncate length; defaults to the tokenizer's model_max_length
    #[arg(long)]
    pub max_length: Option<usize>,

    /// max_length, longest or do_not_pad
    #[arg(long, default_value_t = Padding::MaxLength)]
    pub padding: Padding,

    /// Where checkpoints, metrics.csv and training_args.json go
    #[arg(long, default_value = "test_trainer")]
    pub output_dir: String,

    /// no, steps or epoch
    #[arg(long, default_value_t = IntervalStrategy::Epoch)]
    pub evaluation_strategy: IntervalStrategy,

    /// Defaults to logging_steps
    #[arg(long)]
    pub eval_steps: Option<usize>,

    #[arg(long, default_value_t = IntervalStrategy::Steps)]
    pub save_strategy: IntervalStrategy,

    #[arg(long, default_value_t = 500)]
    pub save_steps: usize,

    /// Keep at most this many checkpoints
    #[arg(long)]
    pub save_total_limit: Option<usize>,

    #[arg(long, default_value_t = 500)]
    pub logging_steps: usize,

    #[arg(long, default_value_t = 5e-5)]
    pub learning_rate: f64,

    #[arg(long, default_value_t = 3)]
    pub num_train_epochs: usize,

    #[arg(long, default_value_t = 8)]
    pub per_device_train_batch_size: usize,

    #[arg(long, default_value_t = 8)]
    pub per_device_eval_batch_size: usize,

    #[arg(long, default_value_t = 0)]
    pub warmup_steps: usize,

    #[arg(long, default_value_t = 0.0)]
    pub weight_decay: f32,

    #[arg(long, default_value_t = 1.0)]
    pub max_grad_norm: f32,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, default_value_t = 1)]
    pub dataloader_num_workers: usize,

    /// Continue from the newest checkpoint in output_dir
    #[arg(long)]
    pub resume_from_checkpoint: bool,

    /// auto, cpu or gpu:<index>
    #[arg(long, default_value_t = DevicePlacement::Auto)]
    pub device: DevicePlacement,
}

impl From<FineTuneArgs> for FineTuneConfig {
    fn from(a: FineTuneArgs) -> Self {
        FineTuneConfig {
            model: a.model,
            dataset: a.dataset,
            train_split: a.train_split,
            eval_split: a.eval_split,
            max_length: a.max_length,
            padding: a.padding,
            columns: Columns { text: a.text_column, label: a.label_column },
            device: a.device,
            training: TrainingArguments {
                output_dir: a.output_dir,
                evaluation_strategy: a.evaluation_strategy,
                eval_steps: a.eval_steps,
                save_strategy: a.save_strategy,
                save_steps: a.save_steps,
                save_total_limit: a.save_total_limit,
                logging_steps: a.logging_steps,
                learning_rate: a.learning_rate,
                num_train_epochs: a.num_train_epochs,
                per_device_train_batch_size: a.per_device_train_batch_size,
                per_device_eval_batch_size: a.per_device_eval_batch_size,
                warmup_steps: a.warmup_steps,
                weight_decay: a.weight_decay,
                max_grad_norm: a.max_grad_norm,
                seed: a.seed,
                dataloader_num_workers: a.dataloader_num_workers,
                resume_from_checkpoint: a.resume_from_checkpoint,
                ..TrainingArguments::default()
            },
        }
    }
}
