// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All model math lives here: the two architectures, the
// decoding loop that drives the causal LM, and the training
// loop that fine-tunes the classifier.
//
//   llama.rs         — decoder-only causal LM with RoPE, GQA
//                      and an incremental key/value cache
//   distilbert.rs    — encoder with a sequence-classification head
//   generation/      — greedy, sampling and beam decoding
//   pipeline.rs      — tokenizer + causal LM + generation defaults
//   trainer.rs       — AdamW training loop with periodic evaluation
//                      and checkpointing
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Touvron et al. (2023) Llama 2
//            Sanh et al. (2019) DistilBERT

/// Llama decoder architecture
pub mod llama;

/// DistilBERT encoder and classification head
pub mod distilbert;

/// Decoding strategies and their configuration
pub mod generation;

/// Prompt → generated text
pub mod pipeline;

/// Architecture + parameter count printout
pub mod summary;

/// Accuracy and logits preprocessing for evaluation
pub mod metrics;

/// Hyperparameters of a training run
pub mod training_args;

/// Log history and progress counters
pub mod trainer_state;

/// Training loop with validation and checkpointing
pub mod trainer;
