// ============================================================
// Generation configuration
// ============================================================
// Settings are layered, later layers winning:
//
//   1. library defaults              (GenerationConfig::default)
//   2. the model's generation_config.json
//   3. options given by the caller
//
// Layers 2 and 3 are both `GenerationOverrides`, where every
// field is optional, so merging is the same operation twice.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::ConfigError;
use crate::ml::llama::TokenIds;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    pub num_beams: usize,
    /// 0 disables top-k filtering
    pub top_k: usize,
    pub top_p: f32,
    pub temperature: f32,
    pub do_sample: bool,
    pub num_return_sequences: usize,
    pub early_stopping: bool,
    pub length_penalty: f32,
    pub seed: u64,
    pub eos_token_ids: Vec<u32>,
    pub pad_token_id: Option<u32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 20,
            num_beams: 1,
            top_k: 50,
            top_p: 1.0,
            temperature: 1.0,
            do_sample: false,
            num_return_sequences: 1,
            early_stopping: false,
            length_penalty: 1.0,
            seed: 42,
            eos_token_ids: Vec::new(),
            pad_token_id: None,
        }
    }
}

/// One layer of settings. Field names follow generation_config.json;
/// keys this crate does not use (e.g. `max_length`) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GenerationOverrides {
    pub max_new_tokens: Option<usize>,
    pub num_beams: Option<usize>,
    pub top_k: Option<usize>,
    pub top_p: Option<f32>,
    pub temperature: Option<f32>,
    pub do_sample: Option<bool>,
    pub num_return_sequences: Option<usize>,
    pub early_stopping: Option<bool>,
    pub length_penalty: Option<f32>,
    pub seed: Option<u64>,
    pub eos_token_id: Option<TokenIds>,
    pub pad_token_id: Option<u32>,
}

impl GenerationOverrides {
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Malformed '{}'", path.display()))
    }
}

/// Which decoding loop a configuration selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodingMode {
    Greedy,
    Sample,
    BeamSearch,
    BeamSample,
}

impl GenerationConfig {
    pub fn merged(mut self, layer: &GenerationOverrides) -> Self {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if let Some(value) = layer.$field { self.$field = value; })*
            };
        }
        take!(
            max_new_tokens, num_beams, top_k, top_p, temperature, do_sample,
            num_return_sequences, early_stopping, length_penalty, seed
        );
        if let Some(eos) = &layer.eos_token_id {
            self.eos_token_ids = eos.to_vec();
        }
        if layer.pad_token_id.is_some() {
            self.pad_token_id = layer.pad_token_id;
        }
        self
    }

    /// Padding for rows that already finished; falls back to the first EOS id.
    pub fn pad_token(&self) -> u32 {
        self.pad_token_id
            .or_else(|| self.eos_token_ids.first().copied())
            .unwrap_or(0)
    }

    pub fn is_eos(&self, token: u32) -> bool {
        self.eos_token_ids.contains(&token)
    }

    pub fn validate(&self) -> Result<DecodingMode, ConfigError> {
        if self.num_beams == 0 {
            return Err(ConfigError::ZeroBeams);
        }
        if self.num_return_sequences == 0 {
            return Err(ConfigError::ZeroReturnSequences);
        }
        if self.max_new_tokens == 0 {
            return Err(ConfigError::ZeroMaxNewTokens);
        }
        if self.do_sample {
            if !(self.top_p > 0.0 && self.top_p <= 1.0) {
                return Err(ConfigError::InvalidTopP(self.top_p));
            }
            if self.temperature <= 0.0 || !self.temperature.is_finite() {
                return Err(ConfigError::InvalidTemperature(self.temperature));
            }
        }

        let mode = match (self.num_beams > 1, self.do_sample) {
            (false, false) => DecodingMode::Greedy,
            (false, true) => DecodingMode::Sample,
            (true, false) => DecodingMode::BeamSearch,
            (true, true) => DecodingMode::BeamSample,
        };
        match mode {
            DecodingMode::Greedy if self.num_return_sequences > 1 => {
                Err(ConfigError::GreedyMultipleSequences(self.num_return_sequences))
            }
            DecodingMode::BeamSearch | DecodingMode::BeamSample
                if self.num_return_sequences > self.num_beams =>
            {
                Err(ConfigError::TooManyReturnSequences {
                    requested: self.num_return_sequences,
                    num_beams: self.num_beams,
                })
            }
            _ => Ok(mode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beams(num_beams: usize, do_sample: bool, nrs: usize) -> GenerationConfig {
        GenerationConfig { num_beams, do_sample, num_return_sequences: nrs, ..Default::default() }
    }

    #[test]
    fn test_layers_apply_in_order() {
        let file: GenerationOverrides = serde_json::from_str(
            r#"{"do_sample": true, "temperature": 0.6, "top_p": 0.9, "eos_token_id": 2,
                "pad_token_id": 0, "max_length": 4096}"#,
        )
        .unwrap();
        let caller = GenerationOverrides { top_p: Some(0.8), num_beams: Some(2), ..Default::default() };

        let config = GenerationConfig::default().merged(&file).merged(&caller);
        assert_eq!(config.top_p, 0.8);
        assert_eq!(config.temperature, 0.6);
        assert_eq!(config.num_beams, 2);
        assert!(config.do_sample);
        assert_eq!(config.eos_token_ids, vec![2]);
        assert_eq!(config.pad_token(), 0);
        assert_eq!(config.max_new_tokens, 20);
    }

    #[test]
    fn test_pad_defaults_to_eos() {
        let config = GenerationConfig { eos_token_ids: vec![7, 9], ..Default::default() };
        assert_eq!(config.pad_token(), 7);
    }

    #[test]
    fn test_modes() {
        assert_eq!(beams(1, false, 1).validate(), Ok(DecodingMode::Greedy));
        assert_eq!(beams(1, true, 4).validate(), Ok(DecodingMode::Sample));
        assert_eq!(beams(3, false, 2).validate(), Ok(DecodingMode::BeamSearch));
        assert_eq!(beams(2, true, 2).validate(), Ok(DecodingMode::BeamSample));
    }

    #[test]
    fn test_validation_errors() {
        assert_eq!(beams(0, false, 1).validate(), Err(ConfigError::ZeroBeams));
        assert_eq!(beams(1, false, 0).validate(), Err(ConfigError::ZeroReturnSequences));
        assert_eq!(beams(1, false, 2).validate(), Err(ConfigError::GreedyMultipleSequences(2)));
        assert_eq!(
            beams(2, true, 3).validate(),
            Err(ConfigError::TooManyReturnSequences { requested: 3, num_beams: 2 })
        );
        let no_tokens = GenerationConfig { max_new_tokens: 0, ..Default::default() };
        assert_eq!(no_tokens.validate(), Err(ConfigError::ZeroMaxNewTokens));
        let bad_p = GenerationConfig { top_p: 1.5, ..beams(1, true, 1) };
        assert_eq!(bad_p.validate(), Err(ConfigError::InvalidTopP(1.5)));
        let cold = GenerationConfig { temperature: 0.0, ..beams(1, true, 1) };
        assert_eq!(cold.validate(), Err(ConfigError::InvalidTemperature(0.0)));
    }
}
