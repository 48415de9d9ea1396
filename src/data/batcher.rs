// ============================================================
// Layer 4 — Classification Batcher
// ============================================================
// Implements Burn's Batcher trait to stack TokenizedSamples
// into tensors:
//
//   Input:  Vec of N samples, each of length ≤ S
//   Output: ClassificationBatch with [N, S] ids/mask, [N] labels
//
// With max_length padding every sample already has length S.
// Shorter rows (longest-in-batch padding) are filled here with
// the pad id and a zero mask.
//
// Reference: Burn Book §4 (Batcher)

use burn::{data::dataloader::batcher::Batcher, prelude::*};

use crate::data::dataset::TokenizedSample;

#[derive(Debug, Clone)]
pub struct ClassificationBatch<B: Backend> {
    /// [batch_size, seq_len]
    pub input_ids: Tensor<B, 2, Int>,
    /// [batch_size, seq_len], 1 = real token, 0 = padding
    pub attention_mask: Tensor<B, 2, Int>,
    /// [batch_size]
    pub labels: Tensor<B, 1, Int>,
}

#[derive(Clone, Debug)]
pub struct ClassificationBatcher<B: Backend> {
    pub device: B::Device,
    pub pad_id: u32,
}

impl<B: Backend> ClassificationBatcher<B> {
    pub fn new(device: B::Device, pad_id: u32) -> Self {
        Self { device, pad_id }
    }
}

impl<B: Backend> Batcher<TokenizedSample, ClassificationBatch<B>> for ClassificationBatcher<B> {
    fn batch(&self, items: Vec<TokenizedSample>) -> ClassificationBatch<B> {
        let batch_size = items.len();
        let seq_len = items.iter().map(|s| s.input_ids.len()).max().unwrap_or(0);

        let mut input_flat: Vec<i32> = Vec::with_capacity(batch_size * seq_len);
        let mut mask_flat: Vec<i32> = Vec::with_capacity(batch_size * seq_len);
        for sample in &items {
            let missing = seq_len - sample.input_ids.len();
            input_flat.extend(sample.input_ids.iter().map(|&x| x as i32));
            input_flat.extend(std::iter::repeat(self.pad_id as i32).take(missing));
            mask_flat.extend(sample.attention_mask.iter().map(|&x| x as i32));
            mask_flat.extend(std::iter::repeat(0).take(missing));
        }
        let labels: Vec<i32> = items.iter().map(|s| s.label as i32).collect();

        let input_ids = Tensor::<B, 1, Int>::from_ints(input_flat.as_slice(), &self.device)
            .reshape([batch_size, seq_len]);
        let attention_mask = Tensor::<B, 1, Int>::from_ints(mask_flat.as_slice(), &self.device)
            .reshape([batch_size, seq_len]);
        let labels = Tensor::<B, 1, Int>::from_ints(labels.as_slice(), &self.device);

        ClassificationBatch { input_ids, attention_mask, labels }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    fn sample(ids: &[u32], label: i64) -> TokenizedSample {
        TokenizedSample { input_ids: ids.to_vec(), attention_mask: vec![1; ids.len()], label }
    }

    #[test]
    fn test_ragged_rows_are_padded() {
        let batcher = ClassificationBatcher::<NdArray>::new(Default::default(), 0);
        let batch = batcher.batch(vec![sample(&[2, 7, 3], 1), sample(&[2, 3], 0)]);

        assert_eq!(batch.input_ids.dims(), [2, 3]);
        let ids: Vec<i64> = batch.input_ids.into_data().iter::<i64>().collect();
        let mask: Vec<i64> = batch.attention_mask.into_data().iter::<i64>().collect();
        let labels: Vec<i64> = batch.labels.into_data().iter::<i64>().collect();
        assert_eq!(ids, vec![2, 7, 3, 2, 3, 0]);
        assert_eq!(mask, vec![1, 1, 1, 1, 1, 0]);
        assert_eq!(labels, vec![1, 0]);
    }
}
