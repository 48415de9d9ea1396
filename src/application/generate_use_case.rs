// ============================================================
// Layer 2 — GenerateUseCase
// ============================================================
// Runs the text-generation pipeline:
//
//   Step 1: Resolve the model repository        (Layer 6 - infra)
//   Step 2: Load and print the tokenizer        (Layer 6 - infra)
//   Step 3: Build the pipeline on the device    (Layer 5 - ml)
//   Step 4: Layer caller options over defaults  (Layer 5 - ml)
//   Step 5: Generate and print every candidate

use anyhow::Result;
use burn::backend::Wgpu;

use crate::domain::{generation::GeneratedText, traits::TextGenerator};
use crate::infra::{device::DevicePlacement, hub::HubClient, tokenizer_store::TokenizerStore};
use crate::ml::generation::config::GenerationOverrides;
use crate::ml::pipeline::TextGenerationPipeline;

#[derive(Debug, Clone)]
pub struct GenerateConfig {
    pub model: String,
    pub prompt: String,
    /// Caller options; unset fields keep the model's defaults
    pub options: GenerationOverrides,
    pub device: DevicePlacement,
}

pub struct GenerateUseCase {
    config: GenerateConfig,
}

impl GenerateUseCase {
    pub fn new(config: GenerateConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<Vec<GeneratedText>> {
        let hub = HubClient::new()?;
        let repo = hub.model(&self.config.model);

        let tokenizer = TokenizerStore::new(&repo).load()?;
        println!("{tokenizer}");

        let device = self.config.device.wgpu_device();
        tracing::info!("Loading '{}' on {:?}", repo.id(), device);
        let pipeline = TextGenerationPipeline::<Wgpu>::from_pretrained(&repo, tokenizer, &device)?;
        println!("{}", pipeline.summary());

        let options = pipeline.generation_config().clone().merged(&self.config.options);
        tracing::debug!("Generation options: {:?}", options);

        let results = pipeline.generate(&self.config.prompt, &options)?;
        for result in &results {
            println!("RESULT: {}", result.generated_text);
        }
        println!("{}", serde_json::to_string_pretty(&results)?);
        Ok(results)
    }
}
