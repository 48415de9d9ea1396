// ============================================================
// Layer 5 — Text-Generation Pipeline
// ============================================================
// Bundles a causal LM with its tokenizer and default
// generation settings:
//
//   prompt → encode → generate token ids → decode
//          → prompt + continuation
//
// The continuation is recovered by decoding prompt and
// generated ids together and cutting off the decoded prompt,
// so tokens that merge across the boundary decode correctly.

use anyhow::Result;
use burn::prelude::*;

use crate::domain::generation::GeneratedText;
use crate::domain::traits::TextGenerator;
use crate::infra::hub::ModelRepo;
use crate::infra::tokenizer_store::PretrainedTokenizer;
use crate::infra::weights::WeightStore;
use crate::ml::generation::{
    self,
    config::{GenerationConfig, GenerationOverrides},
};
use crate::ml::llama::{LlamaConfig, LlamaForCausalLM};
use crate::ml::summary::ModelSummary;

pub struct TextGenerationPipeline<B: Backend> {
    model: LlamaForCausalLM<B>,
    config: LlamaConfig,
    tokenizer: PretrainedTokenizer,
    generation_config: GenerationConfig,
    device: B::Device,
}

impl<B: Backend> TextGenerationPipeline<B> {
    /// Load config, weights and generation defaults from a model repo.
    pub fn from_pretrained(repo: &ModelRepo, tokenizer: PretrainedTokenizer, device: &B::Device) -> Result<Self> {
        let config = LlamaConfig::from_file(&repo.config()?)?;
        if let Some(dtype) = &config.torch_dtype {
            tracing::info!("Checkpoint stored as {}, computing in f32", dtype);
        }

        let store = WeightStore::open(&repo.weight_files()?)?;
        let model = config.load(&store, device)?;
        tracing::info!("Loaded '{}' ({} parameters)", repo.id(), model.num_params());

        let file_layer = match repo.optional("generation_config.json") {
            Some(path) => Some(GenerationOverrides::from_file(&path)?),
            None => None,
        };
        Ok(Self::new(model, config, tokenizer, file_layer.as_ref(), device.clone()))
    }

    pub fn new(
        model: LlamaForCausalLM<B>,
        config: LlamaConfig,
        tokenizer: PretrainedTokenizer,
        file_layer: Option<&GenerationOverrides>,
        device: B::Device,
    ) -> Self {
        tokenizer.check_model_vocab(config.vocab_size);

        let mut eos_token_ids = config.eos_token_ids();
        if eos_token_ids.is_empty() {
            eos_token_ids.extend(tokenizer.eos_token_id());
        }
        let base = GenerationConfig {
            eos_token_ids,
            pad_token_id: config.pad_token_id,
            ..Default::default()
        };
        let generation_config = match file_layer {
            Some(layer) => base.merged(layer),
            None => base,
        };

        Self { model, config, tokenizer, generation_config, device }
    }

    /// Library defaults with the model's own generation settings applied.
    pub fn generation_config(&self) -> &GenerationConfig {
        &self.generation_config
    }

    pub fn summary(&self) -> ModelSummary {
        ModelSummary::new("LlamaForCausalLM", &self.config, self.model.num_params())
    }
}

impl<B: Backend> TextGenerator for TextGenerationPipeline<B> {
    type Options = GenerationConfig;

    fn generate(&self, prompt: &str, options: &GenerationConfig) -> Result<Vec<GeneratedText>> {
        let prompt_ids = self.tokenizer.encode(prompt, true)?.get_ids().to_vec();
        tracing::info!(
            "Generating {} sequence(s) of up to {} tokens from a {}-token prompt",
            options.num_return_sequences,
            options.max_new_tokens,
            prompt_ids.len()
        );

        let decoded_prompt = self.tokenizer.decode(&prompt_ids, true)?;
        let mut outputs = Vec::with_capacity(options.num_return_sequences);
        for new_ids in generation::generate(&self.model, &prompt_ids, options, &self.device)? {
            let full_ids: Vec<u32> = prompt_ids.iter().chain(&new_ids).copied().collect();
            let full = self.tokenizer.decode(&full_ids, true)?;
            let continuation = match full.strip_prefix(decoded_prompt.as_str()) {
                Some(rest) => rest.to_string(),
                None => self.tokenizer.decode(&new_ids, true)?,
            };
            outputs.push(GeneratedText::new(format!("{prompt}{continuation}")));
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::tokenizer_store::word_level_tokenizer;
    use crate::ml::llama::tests::tiny_config;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn pipeline(file_layer: Option<&GenerationOverrides>) -> TextGenerationPipeline<TestBackend> {
        let tokenizer = word_level_tokenizer(
            &["the movie was great and the plot was thin", "a long answer to a short question"],
            &["<unk>", "<s>", "</s>"],
        );
        let tokenizer = PretrainedTokenizer::from_parts(
            tokenizer,
            "tiny-llama",
            &serde_json::json!({"bos_token": "<s>", "eos_token": "</s>", "unk_token": "<unk>"}),
        );
        let config = tiny_config(tokenizer.vocab_size());
        let device = Default::default();
        let model = config.init::<TestBackend>(&device);
        TextGenerationPipeline::new(model, config, tokenizer, file_layer, device)
    }

    #[test]
    fn test_results_start_with_prompt() {
        let pipe = pipeline(None);
        let options = GenerationConfig {
            max_new_tokens: 5,
            num_beams: 2,
            top_k: 2,
            top_p: 0.8,
            do_sample: true,
            num_return_sequences: 2,
            early_stopping: true,
            ..pipe.generation_config().clone()
        };
        let results = pipe.generate("The movie was", &options).unwrap();
        assert_eq!(results.len(), 2);
        for result in &results {
            assert!(result.generated_text.starts_with("The movie was"));
        }
    }

    #[test]
    fn test_eos_comes_from_model_config() {
        let pipe = pipeline(None);
        assert_eq!(pipe.generation_config().eos_token_ids, vec![2]);
        assert_eq!(pipe.generation_config().pad_token(), 2);
    }

    #[test]
    fn test_file_layer_applies() {
        let layer = GenerationOverrides { temperature: Some(0.6), do_sample: Some(true), ..Default::default() };
        let pipe = pipeline(Some(&layer));
        assert_eq!(pipe.generation_config().temperature, 0.6);
        assert!(pipe.generation_config().do_sample);
    }

    #[test]
    fn test_greedy_output_is_stable() {
        let pipe = pipeline(None);
        let options = GenerationConfig { max_new_tokens: 4, ..pipe.generation_config().clone() };
        let a = pipe.generate("a short question", &options).unwrap();
        let b = pipe.generate("a short question", &options).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_summary_names_architecture() {
        let shown = pipeline(None).summary().to_string();
        assert!(shown.starts_with("LlamaForCausalLM("));
        assert!(shown.contains("\"hidden_size\": 16"));
    }
}
