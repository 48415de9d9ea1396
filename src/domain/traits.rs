// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The application layer programs against these traits so the
// dataset can come from the hub or from a local directory
// without the use case noticing.

use anyhow::{ensure, Result};

use crate::domain::generation::GeneratedText;
use crate::domain::record::{DatasetDict, LabeledText};

// ─── DatasetSource ────────────────────────────────────────────────────────────
/// Anything that can produce the named splits of a labelled dataset.
///
/// Implementations:
///   - HubDataset   → parquet shards resolved through the hub cache
///   - LocalDataset → `<split>.parquet` / `<split>.jsonl` files in a directory
pub trait DatasetSource {
    /// Load one split by name, e.g. "train".
    fn load_split(&self, split: &str) -> Result<Vec<LabeledText>>;

    /// Names of every split the source offers.
    fn split_names(&self) -> Result<Vec<String>>;

    /// Identifier used when printing the dataset.
    fn name(&self) -> &str;

    /// Load several splits into one dictionary.
    fn load_splits(&self, splits: &[&str]) -> Result<DatasetDict> {
        let mut dict = DatasetDict::new(self.name());
        for split in splits {
            let records = self.load_split(split)?;
            tracing::info!("Loaded split '{}' with {} records", split, records.len());
            dict.insert(*split, records);
        }
        Ok(dict)
    }

    /// Load every available split. Each of `required` must be among them.
    fn load_all_splits(&self, required: &[&str]) -> Result<DatasetDict> {
        let available = self.split_names()?;
        for split in required {
            ensure!(
                available.iter().any(|name| name == split),
                "Dataset '{}' has no split '{}' (available: {})",
                self.name(),
                split,
                available.join(", ")
            );
        }
        let names: Vec<&str> = available.iter().map(String::as_str).collect();
        self.load_splits(&names)
    }
}

// ─── TextGenerator ────────────────────────────────────────────────────────────
/// Anything that turns a prompt into generated candidates.
pub trait TextGenerator {
    type Options;

    fn generate(&self, prompt: &str, options: &Self::Options) -> Result<Vec<GeneratedText>>;
}
