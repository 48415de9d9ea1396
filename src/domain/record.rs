// ============================================================
// Layer 3 — Labelled Text Records
// ============================================================
// A classification dataset is an ordered collection of
// (text, label) records split into named partitions such as
// "train", "validation" and "test".

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One record of a text classification dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledText {
    /// The raw review text
    pub text: String,

    /// Class index, e.g. 0 = negative, 1 = positive
    pub label: i64,
}

impl LabeledText {
    pub fn new(text: impl Into<String>, label: i64) -> Self {
        Self { text: text.into(), label }
    }
}

/// Named splits of a dataset, kept in name order so printing
/// and iteration are stable.
#[derive(Debug, Clone, Default)]
pub struct DatasetDict {
    /// Identifier the dataset was resolved from
    pub name: String,
    pub splits: BTreeMap<String, Vec<LabeledText>>,
}

impl DatasetDict {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), splits: BTreeMap::new() }
    }

    pub fn insert(&mut self, split: impl Into<String>, records: Vec<LabeledText>) {
        self.splits.insert(split.into(), records);
    }

    /// Number of distinct labels seen across all splits.
    pub fn num_labels(&self) -> usize {
        self.splits
            .values()
            .flatten()
            .map(|r| r.label)
            .max()
            .and_then(|max| usize::try_from(max).ok())
            .map_or(0, |max| max + 1)
    }
}

impl fmt::Display for DatasetDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DatasetDict({{")?;
        for (name, records) in &self.splits {
            writeln!(f, "    {name}: Dataset({{")?;
            writeln!(f, "        features: ['text', 'label'],")?;
            writeln!(f, "        num_rows: {}", records.len())?;
            writeln!(f, "    }})")?;
        }
        write!(f, "}})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_labels_uses_highest_label() {
        let mut dict = DatasetDict::new("reviews");
        dict.insert("train", vec![LabeledText::new("good", 1), LabeledText::new("bad", 0)]);
        dict.insert("test", vec![LabeledText::new("fine", 1)]);
        assert_eq!(dict.num_labels(), 2);
    }

    #[test]
    fn test_num_labels_ignores_negative_maximum() {
        let mut dict = DatasetDict::new("reviews");
        dict.insert("train", vec![LabeledText::new("odd", -1)]);
        assert_eq!(dict.num_labels(), 0);
        assert_eq!(DatasetDict::new("empty").num_labels(), 0);
    }

    #[test]
    fn test_display_lists_every_split() {
        let mut dict = DatasetDict::new("reviews");
        dict.insert("train", vec![LabeledText::new("good", 1)]);
        dict.insert("test", Vec::new());
        let shown = dict.to_string();
        assert!(shown.contains("train: Dataset"));
        assert!(shown.contains("test: Dataset"));
        assert!(shown.contains("num_rows: 1"));
        assert!(shown.contains("num_rows: 0"));
    }
}
