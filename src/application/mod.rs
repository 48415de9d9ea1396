// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Each use case runs one pipeline from start to finish,
// calling into the data, ml and infra layers in order and
// printing what the user should see.
//
// No model math lives here; this layer only sequences stages.

/// Prompt → pretrained causal LM → decoded candidates
pub mod generate_use_case;

/// Dataset → tokenizer → classifier → trainer
pub mod finetune_use_case;
