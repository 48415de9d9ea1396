// ============================================================
// Layer 4 — Batched Tokenization Map
// ============================================================
// Applies the tokenizer to every record of every split, a
// chunk of records at a time:
//
//   LabeledText { text, label }
//     → encode_batch (padding + truncation)
//     → TokenizedSample { input_ids, attention_mask, label }
//
// Record count and order are preserved per split. With
// max_length padding every sequence has exactly max_length
// tokens; truncation keeps the special tokens within budget.
//
// Reference: Rust Book §13 (Iterators and Closures)

use anyhow::{ensure, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tokenizers::{PaddingParams, PaddingStrategy, TruncationParams};

use crate::data::dataset::{ClassificationDataset, TokenizedSample};
use crate::domain::record::{DatasetDict, LabeledText};
use crate::error::ConfigError;
use crate::infra::tokenizer_store::PretrainedTokenizer;

/// How sequences are padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// Every sequence padded to `max_length`
    MaxLength,
    /// Padded to the longest sequence of each chunk
    Longest,
    /// Ragged rows; the batcher pads each batch
    DoNotPad,
}

impl FromStr for Padding {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "max_length" => Ok(Self::MaxLength),
            "longest" => Ok(Self::Longest),
            "do_not_pad" => Ok(Self::DoNotPad),
            _ => Err(ConfigError::UnknownPadding(s.to_string())),
        }
    }
}

impl fmt::Display for Padding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Padding::MaxLength => write!(f, "max_length"),
            Padding::Longest => write!(f, "longest"),
            Padding::DoNotPad => write!(f, "do_not_pad"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenizeOptions {
    pub max_length: usize,
    pub padding: Padding,
    pub truncation: bool,
    /// Records encoded per call
    pub batch_size: usize,
}

impl TokenizeOptions {
    pub fn max_length(max_length: usize) -> Self {
        Self { max_length, padding: Padding::MaxLength, truncation: true, batch_size: 1000 }
    }
}

/// Tokenized splits with the same names as the source dataset.
#[derive(Debug, Clone, Default)]
pub struct TokenizedDatasetDict {
    pub splits: BTreeMap<String, Vec<TokenizedSample>>,
}

impl TokenizedDatasetDict {
    /// Move a split out as a burn dataset.
    pub fn take_dataset(&mut self, name: &str) -> Option<ClassificationDataset> {
        self.splits.remove(name).map(ClassificationDataset::new)
    }
}

impl fmt::Display for TokenizedDatasetDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DatasetDict({{")?;
        for (name, samples) in &self.splits {
            writeln!(f, "    {name}: Dataset({{")?;
            writeln!(f, "        features: ['label', 'input_ids', 'attention_mask'],")?;
            writeln!(f, "        num_rows: {}", samples.len())?;
            writeln!(f, "    }})")?;
        }
        write!(f, "}})")
    }
}

pub fn tokenize_dataset(
    tokenizer: &PretrainedTokenizer,
    dataset: &DatasetDict,
    options: &TokenizeOptions,
) -> Result<TokenizedDatasetDict> {
    let mut splits = BTreeMap::new();
    for (name, records) in &dataset.splits {
        let samples = tokenize_split(tokenizer, records, options)?;
        tracing::info!("Tokenized split '{}': {} records", name, samples.len());
        splits.insert(name.clone(), samples);
    }
    Ok(TokenizedDatasetDict { splits })
}

pub fn tokenize_split(
    tokenizer: &PretrainedTokenizer,
    records: &[LabeledText],
    options: &TokenizeOptions,
) -> Result<Vec<TokenizedSample>> {
    ensure!(options.batch_size > 0, "Tokenization batch size must be positive");

    let mut encoder = tokenizer.inner().clone();
    let strategy = match options.padding {
        Padding::MaxLength => Some(PaddingStrategy::Fixed(options.max_length)),
        Padding::Longest => Some(PaddingStrategy::BatchLongest),
        Padding::DoNotPad => None,
    };
    let padding = strategy.map(|strategy| PaddingParams {
        strategy,
        pad_id: tokenizer.pad_token_id().unwrap_or(0),
        pad_token: tokenizer.pad_token().unwrap_or_else(|| "[PAD]".to_string()),
        ..Default::default()
    });
    encoder.with_padding(padding);
    if options.truncation {
        encoder
            .with_truncation(Some(TruncationParams {
                max_length: options.max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Invalid truncation settings: {e}"))?;
    }

    let mut samples = Vec::with_capacity(records.len());
    for chunk in records.chunks(options.batch_size) {
        let texts: Vec<&str> = chunk.iter().map(|r| r.text.as_str()).collect();
        let encodings = encoder
            .encode_batch(texts, true)
            .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))?;

        samples.extend(chunk.iter().zip(encodings).map(|(record, enc)| TokenizedSample {
            input_ids: enc.get_ids().to_vec(),
            attention_mask: enc.get_attention_mask().to_vec(),
            label: record.label,
        }));
    }

    ensure!(
        samples.len() == records.len(),
        "Tokenization produced {} samples from {} records",
        samples.len(),
        records.len()
    );
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::tokenizer_store::word_level_tokenizer;

    fn tokenizer() -> PretrainedTokenizer {
        let texts = ["a gripping and moving film", "dull", "the plot is thin and the acting is flat"];
        PretrainedTokenizer::from_parts(
            word_level_tokenizer(&texts, &["[PAD]", "[UNK]"]),
            "tiny",
            &serde_json::json!({"pad_token": "[PAD]", "unk_token": "[UNK]"}),
        )
    }

    fn reviews() -> DatasetDict {
        let mut dict = DatasetDict::new("reviews");
        dict.insert(
            "train",
            vec![
                LabeledText::new("a gripping and moving film", 1),
                LabeledText::new("dull", 0),
                LabeledText::new("the plot is thin and the acting is flat", 0),
            ],
        );
        dict.insert("test", vec![LabeledText::new("moving", 1)]);
        dict
    }

    #[test]
    fn test_record_counts_are_preserved() {
        let options = TokenizeOptions { batch_size: 2, ..TokenizeOptions::max_length(6) };
        let tokenized = tokenize_dataset(&tokenizer(), &reviews(), &options).unwrap();
        assert_eq!(tokenized.splits["train"].len(), 3);
        assert_eq!(tokenized.splits["test"].len(), 1);
        assert_eq!(tokenized.splits["train"][1].label, 0);
    }

    #[test]
    fn test_max_length_padding_and_truncation() {
        let tok = tokenizer();
        let samples = tokenize_split(&tok, &reviews().splits["train"], &TokenizeOptions::max_length(6)).unwrap();
        for sample in &samples {
            assert_eq!(sample.input_ids.len(), 6);
            assert_eq!(sample.attention_mask.len(), 6);
        }
        // "dull" is one token followed by padding
        assert_eq!(samples[1].attention_mask.iter().sum::<u32>(), 1);
        assert_eq!(samples[1].input_ids[1..], [0, 0, 0, 0, 0]);
        // the long review is cut to the budget
        assert_eq!(samples[2].attention_mask.iter().sum::<u32>(), 6);
    }

    #[test]
    fn test_without_padding_lengths_vary() {
        let options = TokenizeOptions { padding: Padding::DoNotPad, ..TokenizeOptions::max_length(32) };
        let samples = tokenize_split(&tokenizer(), &reviews().splits["train"], &options).unwrap();
        let lens: Vec<usize> = samples.iter().map(|s| s.input_ids.len()).collect();
        assert_eq!(lens, vec![5, 1, 9]);
    }

    #[test]
    fn test_longest_pads_per_chunk() {
        let options = TokenizeOptions { padding: Padding::Longest, batch_size: 2, ..TokenizeOptions::max_length(32) };
        let samples = tokenize_split(&tokenizer(), &reviews().splits["train"], &options).unwrap();
        let lens: Vec<usize> = samples.iter().map(|s| s.input_ids.len()).collect();
        assert_eq!(lens, vec![5, 5, 9]);
        assert_eq!(samples[1].attention_mask, vec![1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_parse_padding() {
        assert_eq!("longest".parse::<Padding>().unwrap(), Padding::Longest);
        assert_eq!(Padding::DoNotPad.to_string().parse::<Padding>().unwrap(), Padding::DoNotPad);
        assert_eq!("batch".parse::<Padding>(), Err(ConfigError::UnknownPadding("batch".into())));
    }
}
