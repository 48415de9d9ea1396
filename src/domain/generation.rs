// ============================================================
// Layer 3 — Generated Text
// ============================================================
// The text-generation pipeline returns one of these per
// requested sequence. The field name mirrors the key used by
// the hub's pipeline outputs so the JSON dump reads the same.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedText {
    /// Prompt followed by the decoded continuation
    pub generated_text: String,
}

impl GeneratedText {
    pub fn new(generated_text: impl Into<String>) -> Self {
        Self { generated_text: generated_text.into() }
    }
}
