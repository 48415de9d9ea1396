// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns shared by both pipelines:
//
//   hub.rs             — resolves model and dataset files from a
//                        local directory or the hub cache
//   weights.rs         — safetensors weight store that builds
//                        burn layers from named tensors
//   tokenizer_store.rs — loads the pretrained tokenizer and its
//                        metadata from a model repo
//   device.rs          — device placement hint → wgpu device
//   checkpoint.rs      — checkpoint-{step} directories written
//                        with Burn's CompactRecorder
//   metrics.rs         — evaluation metrics CSV logger
//
// Reference: Rust Book §7 (Modules)
//            Burn Book §5 (Checkpointing)

/// Model / dataset file resolution
pub mod hub;

/// Pretrained weights → burn modules
pub mod weights;

/// Tokenizer loading
pub mod tokenizer_store;

/// Device placement
pub mod device;

/// Checkpoint saving and rotation
pub mod checkpoint;

/// Evaluation metrics CSV logger
pub mod metrics;
