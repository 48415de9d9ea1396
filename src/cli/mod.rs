// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses the command line with clap and hands each command
// to its use case in Layer 2.
//
//   1. `generate`  — text generation with a pretrained causal LM
//   2. `fine-tune` — train a sequence classifier on a labelled dataset
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, FineTuneArgs, GenerateArgs};

#[derive(Parser, Debug)]
#[command(
    name = "transformer-recipes",
    version,
    about = "Generate text with a pretrained LM, or fine-tune a classifier."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Route to the matching use case; nothing is computed here.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Generate(args) => run_generate(args),
            Commands::FineTune(args) => run_fine_tune(args),
        }
    }
}

fn run_generate(args: GenerateArgs) -> Result<()> {
    use crate::application::generate_use_case::GenerateUseCase;

    tracing::info!("Generating with model: {}", args.model);
    let results = GenerateUseCase::new(args.into()).execute()?;
    tracing::info!("Generated {} sequence(s)", results.len());
    Ok(())
}

fn run_fine_tune(args: FineTuneArgs) -> Result<()> {
    use crate::application::finetune_use_case::FineTuneUseCase;

    tracing::info!("Fine-tuning {} on {}", args.model, args.dataset);
    let output = FineTuneUseCase::new(args.into()).execute()?;
    println!("Training complete after {} steps.", output.global_step);
    Ok(())
}
