// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs and traits describing what the two
// pipelines move around:
//
//   - labelled text records (the movie review dataset)
//   - generated text candidates (the generation pipeline)
//   - the source abstraction that produces dataset splits
//
// Rules for this layer:
//   - NO Burn framework types
//   - NO file I/O or network calls
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// One labelled text record and the split container
pub mod record;

// One candidate returned by the text-generation pipeline
pub mod generation;

// Core abstractions (traits) that other layers implement
pub mod traits;
