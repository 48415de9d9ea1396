// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from a dataset identifier to tensor batches:
//
//   dataset id / local dir
//       │
//       ▼
//   loader            → parquet / jsonl → DatasetDict
//       │
//       ▼
//   tokenize          → batched map: pad + truncate per split
//       │
//       ▼
//   ClassificationDataset → Burn's Dataset trait
//       │
//       ▼
//   ClassificationBatcher → stacks samples into tensors
//       │
//       ▼
//   DataLoader        → feeds batches to the trainer
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Hub and local-directory dataset sources
pub mod loader;

/// Batched tokenization map over dataset splits
pub mod tokenize;

/// Implements Burn's Dataset trait for tokenized samples
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;
