// ============================================================
// Layer 5 — Model Summary
// ============================================================
// Printed after a model is loaded: architecture name, the
// config it was built from and its parameter count.

use serde::Serialize;
use std::fmt;

/// What the pipelines print once weights are in place.
pub struct ModelSummary {
    /// Hub class name, e.g. "LlamaForCausalLM"
    pub architecture: &'static str,

    /// The model config as JSON, printed pretty
    pub config: serde_json::Value,

    /// Trainable and frozen parameters together
    pub num_params: usize,
}

impl ModelSummary {
    pub fn new<C: Serialize>(architecture: &'static str, config: &C, num_params: usize) -> Self {
        let config = serde_json::to_value(config).unwrap_or_default();
        Self { architecture, config, num_params }
    }
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = serde_json::to_string_pretty(&self.config).map_err(|_| fmt::Error)?;
        writeln!(f, "{}({})", self.architecture, config)?;
        write!(f, "num_params: {}", self.num_params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        #[derive(Serialize)]
        struct Cfg {
            dim: usize,
        }
        let shown = ModelSummary::new("TinyModel", &Cfg { dim: 8 }, 1234).to_string();
        assert!(shown.starts_with("TinyModel({"));
        assert!(shown.contains("\"dim\": 8"));
        assert!(shown.ends_with("num_params: 1234"));
    }
}
