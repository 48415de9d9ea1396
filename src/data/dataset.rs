// ============================================================
// Layer 4 — Tokenized Classification Dataset
// ============================================================
// In-memory split of tokenized examples, exposed through
// burn's `Dataset` trait so the `DataLoaderBuilder` can index,
// shuffle and batch it.

use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

/// One tokenized classification example.
/// Sequence format: [CLS] review tokens [SEP] [PAD]...
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedSample {
    /// Token ids, special tokens included
    pub input_ids: Vec<u32>,

    /// 1 for real tokens, 0 for padding
    pub attention_mask: Vec<u32>,

    /// Reference class index
    pub label: i64,
}

/// A split ready for the data loader. Order matches the source records.
#[derive(Debug, Clone, Default)]
pub struct ClassificationDataset {
    samples: Vec<TokenizedSample>,
}

impl ClassificationDataset {
    pub fn new(samples: Vec<TokenizedSample>) -> Self {
        Self { samples }
    }

    /// Length of the longest sequence, padding included.
    pub fn max_seq_len(&self) -> usize {
        self.samples.iter().map(|s| s.input_ids.len()).max().unwrap_or(0)
    }
}

impl Dataset<TokenizedSample> for ClassificationDataset {
    fn get(&self, index: usize) -> Option<TokenizedSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_indexing() {
        let sample = TokenizedSample { input_ids: vec![2, 9, 3, 0], attention_mask: vec![1, 1, 1, 0], label: 1 };
        let dataset = ClassificationDataset::new(vec![sample.clone()]);
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.get(0), Some(sample));
        assert!(dataset.get(1).is_none());
    }

    #[test]
    fn test_dataset_keeps_record_order() {
        let samples: Vec<TokenizedSample> = (0..3)
            .map(|label| TokenizedSample { input_ids: vec![2, 3], attention_mask: vec![1, 1], label })
            .collect();
        let dataset = ClassificationDataset::new(samples);
        let labels: Vec<i64> = dataset.iter().map(|s| s.label).collect();
        assert_eq!(labels, vec![0, 1, 2]);
    }

    #[test]
    fn test_max_seq_len_over_ragged_rows() {
        let row = |n: usize| TokenizedSample { input_ids: vec![4; n], attention_mask: vec![1; n], label: 0 };
        assert_eq!(ClassificationDataset::new(vec![row(3), row(7), row(5)]).max_seq_len(), 7);
        assert_eq!(ClassificationDataset::default().max_seq_len(), 0);
    }
}
