// ============================================================
// Layer 4 — Dataset Loader
// ============================================================
// Produces the labelled splits of a text classification
// dataset from one of two places:
//
//   HubDataset   → parquet shards fetched through the hub cache
//   LocalDataset → a directory holding <split>.parquet or
//                  <split>.jsonl ({"text": ..., "label": ...})
//
// Both implement DatasetSource, so the use case never sees
// which one it got.
//
// Parquet rows are read through the record API; only the text
// and label columns are kept. Labels must be non-negative class
// indices.

use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use serde_json::Value;
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use crate::domain::record::LabeledText;
use crate::domain::traits::DatasetSource;
use crate::infra::hub::HubClient;

/// Short dataset names the hub has since moved under an organisation.
const LEGACY_DATASET_IDS: [(&str, &str); 1] =
    [("rotten_tomatoes", "cornell-movie-review-data/rotten_tomatoes")];

/// Which columns hold the text and the label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Columns {
    pub text: String,
    pub label: String,
}

impl Default for Columns {
    fn default() -> Self {
        Self { text: "text".to_string(), label: "label".to_string() }
    }
}

pub fn canonical_dataset_id(id: &str) -> &str {
    LEGACY_DATASET_IDS
        .iter()
        .find(|(short, _)| *short == id)
        .map_or(id, |(_, full)| full)
}

/// A local directory when `id` names one, otherwise the hub.
pub fn open_dataset<'a>(hub: &'a HubClient, id: &str, columns: Columns) -> Box<dyn DatasetSource + 'a> {
    if Path::new(id).is_dir() {
        Box::new(LocalDataset::new(id, columns))
    } else {
        Box::new(HubDataset::new(hub, id, columns))
    }
}

// ─── Hub ──────────────────────────────────────────────────────────────────────

pub struct HubDataset<'a> {
    hub: &'a HubClient,
    id: String,
    columns: Columns,
}

impl<'a> HubDataset<'a> {
    pub fn new(hub: &'a HubClient, id: &str, columns: Columns) -> Self {
        let canonical = canonical_dataset_id(id);
        if canonical != id {
            tracing::info!("Dataset '{}' resolves to '{}'", id, canonical);
        }
        Self { hub, id: canonical.to_string(), columns }
    }
}

impl DatasetSource for HubDataset<'_> {
    fn load_split(&self, split: &str) -> Result<Vec<LabeledText>> {
        let path = self.hub.dataset_split(&self.id, split)?;
        read_parquet(&path, &self.columns)
    }

    fn split_names(&self) -> Result<Vec<String>> {
        self.hub.dataset_splits(&self.id)
    }

    fn name(&self) -> &str {
        &self.id
    }
}

// ─── Local directory ──────────────────────────────────────────────────────────

pub struct LocalDataset {
    dir: PathBuf,
    name: String,
    columns: Columns,
}

impl LocalDataset {
    pub fn new(dir: impl Into<PathBuf>, columns: Columns) -> Self {
        let dir = dir.into();
        let name = dir.display().to_string();
        Self { dir, name, columns }
    }
}

impl DatasetSource for LocalDataset {
    fn load_split(&self, split: &str) -> Result<Vec<LabeledText>> {
        let parquet = self.dir.join(format!("{split}.parquet"));
        if parquet.exists() {
            return read_parquet(&parquet, &self.columns);
        }
        let jsonl = self.dir.join(format!("{split}.jsonl"));
        if jsonl.exists() {
            return read_jsonl(&jsonl, &self.columns);
        }
        bail!("No '{split}.parquet' or '{split}.jsonl' in '{}'", self.dir.display())
    }

    fn split_names(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir).with_context(|| format!("Cannot list '{}'", self.dir.display()))?;
        let mut names = BTreeSet::new();
        for entry in entries {
            let path = entry?.path();
            let is_split = matches!(path.extension().and_then(|e| e.to_str()), Some("parquet" | "jsonl"));
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()).filter(|_| is_split) {
                names.insert(stem.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ─── Readers ──────────────────────────────────────────────────────────────────

pub fn read_parquet(path: &Path, columns: &Columns) -> Result<Vec<LabeledText>> {
    let file = File::open(path).with_context(|| format!("Cannot open '{}'", path.display()))?;
    let reader = SerializedFileReader::new(file)
        .with_context(|| format!("Not a parquet file: '{}'", path.display()))?;

    let mut records = Vec::new();
    for (idx, row) in reader.get_row_iter(None)?.enumerate() {
        let row = row?;
        let mut text = None;
        let mut label = None;
        for (name, field) in row.get_column_iter() {
            if *name == columns.text {
                if let Field::Str(s) = field {
                    text = Some(s.clone());
                }
            } else if *name == columns.label {
                label = match field {
                    Field::Long(v) => Some(*v),
                    Field::Int(v) => Some(i64::from(*v)),
                    Field::Short(v) => Some(i64::from(*v)),
                    Field::Byte(v) => Some(i64::from(*v)),
                    _ => None,
                };
            }
        }
        match (text, label) {
            (Some(_), Some(label)) if label < 0 => {
                bail!("Row {idx} of '{}' has negative label {label}", path.display())
            }
            (Some(text), Some(label)) => records.push(LabeledText { text, label }),
            _ => bail!(
                "Row {idx} of '{}' lacks a '{}' string or an integer '{}'",
                path.display(),
                columns.text,
                columns.label
            ),
        }
    }
    tracing::debug!("Read {} rows from '{}'", records.len(), path.display());
    Ok(records)
}

pub fn read_jsonl(path: &Path, columns: &Columns) -> Result<Vec<LabeledText>> {
    let content = fs::read_to_string(path).with_context(|| format!("Cannot read '{}'", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            let value: Value = serde_json::from_str(line)
                .with_context(|| format!("Line {} of '{}' is not JSON", idx + 1, path.display()))?;
            let text = value.get(&columns.text).and_then(Value::as_str);
            let label = value.get(&columns.label).and_then(Value::as_i64);
            match (text, label) {
                (Some(_), Some(label)) if label < 0 => {
                    bail!("Line {} of '{}' has negative label {label}", idx + 1, path.display())
                }
                (Some(text), Some(label)) => Ok(LabeledText::new(text, label)),
                _ => bail!(
                    "Line {} of '{}' lacks '{}' or '{}'",
                    idx + 1,
                    path.display(),
                    columns.text,
                    columns.label
                ),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquet::column::writer::ColumnWriter;
    use parquet::data_type::ByteArray;
    use parquet::file::properties::WriterProperties;
    use parquet::file::writer::SerializedFileWriter;
    use parquet::schema::parser::parse_message_type;
    use std::sync::Arc;

    fn write_split(dir: &Path, split: &str, lines: &[&str]) {
        fs::write(dir.join(format!("{split}.jsonl")), lines.join("\n")).unwrap();
    }

    #[test]
    fn test_local_jsonl_splits() {
        let dir = tempfile::tempdir().unwrap();
        write_split(
            dir.path(),
            "train",
            &[r#"{"text": "a triumph", "label": 1}"#, "", r#"{"text": "a mess", "label": 0}"#],
        );
        write_split(dir.path(), "test", &[r#"{"text": "fine", "label": 1}"#]);

        let source = LocalDataset::new(dir.path(), Columns::default());
        let dict = source.load_splits(&["train", "test"]).unwrap();
        assert_eq!(dict.splits["train"].len(), 2);
        assert_eq!(dict.splits["train"][1], LabeledText::new("a mess", 0));
        assert_eq!(dict.splits["test"].len(), 1);
    }

    #[test]
    fn test_every_local_split_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        for split in ["train", "validation", "test"] {
            write_split(dir.path(), split, &[r#"{"text": "fine", "label": 1}"#]);
        }
        fs::write(dir.path().join("README.md"), "reviews").unwrap();

        let source = LocalDataset::new(dir.path(), Columns::default());
        assert_eq!(source.split_names().unwrap(), vec!["test", "train", "validation"]);
        let dict = source.load_all_splits(&["train", "test"]).unwrap();
        let names: Vec<&str> = dict.splits.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["test", "train", "validation"]);
    }

    #[test]
    fn test_required_split_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), "train", &[r#"{"text": "fine", "label": 1}"#]);
        let source = LocalDataset::new(dir.path(), Columns::default());
        assert!(source.load_all_splits(&["train", "test"]).is_err());
    }

    #[test]
    fn test_negative_labels_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), "train", &[r#"{"text": "odd", "label": -1}"#]);
        let err = LocalDataset::new(dir.path(), Columns::default()).load_split("train").unwrap_err();
        assert!(err.to_string().contains("negative label"));
    }

    enum ParquetColumn {
        Text(Vec<&'static str>),
        Int64(Vec<i64>),
        Int32(Vec<i32>),
    }

    fn write_parquet(path: &Path, schema: &str, columns: Vec<ParquetColumn>) {
        let schema = Arc::new(parse_message_type(schema).unwrap());
        let props = Arc::new(WriterProperties::builder().build());
        let mut writer = SerializedFileWriter::new(File::create(path).unwrap(), schema, props).unwrap();
        let mut row_group = writer.next_row_group().unwrap();
        let mut columns = columns.into_iter();
        while let Some(mut column) = row_group.next_column().unwrap() {
            match (column.untyped(), columns.next().unwrap()) {
                (ColumnWriter::ByteArrayColumnWriter(w), ParquetColumn::Text(values)) => {
                    let values: Vec<ByteArray> = values.into_iter().map(ByteArray::from).collect();
                    w.write_batch(&values, None, None).unwrap();
                }
                (ColumnWriter::Int64ColumnWriter(w), ParquetColumn::Int64(values)) => {
                    w.write_batch(&values, None, None).unwrap();
                }
                (ColumnWriter::Int32ColumnWriter(w), ParquetColumn::Int32(values)) => {
                    w.write_batch(&values, None, None).unwrap();
                }
                _ => panic!("column data does not match the schema"),
            }
            column.close().unwrap();
        }
        row_group.close().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_parquet_int64_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.parquet");
        write_parquet(
            &path,
            "message schema { REQUIRED BYTE_ARRAY text (UTF8); REQUIRED INT64 label; }",
            vec![ParquetColumn::Text(vec!["a triumph", "a mess"]), ParquetColumn::Int64(vec![1, 0])],
        );
        let records = read_parquet(&path, &Columns::default()).unwrap();
        assert_eq!(records, vec![LabeledText::new("a triumph", 1), LabeledText::new("a mess", 0)]);
    }

    #[test]
    fn test_parquet_int32_labels_and_local_lookup() {
        let dir = tempfile::tempdir().unwrap();
        write_parquet(
            &dir.path().join("test.parquet"),
            "message schema { REQUIRED INT32 label; REQUIRED BYTE_ARRAY text (UTF8); }",
            vec![ParquetColumn::Int32(vec![1]), ParquetColumn::Text(vec!["fine"])],
        );
        let records = LocalDataset::new(dir.path(), Columns::default()).load_split("test").unwrap();
        assert_eq!(records, vec![LabeledText::new("fine", 1)]);
    }

    #[test]
    fn test_parquet_label_must_be_integer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.parquet");
        write_parquet(
            &path,
            "message schema { REQUIRED BYTE_ARRAY text (UTF8); REQUIRED BYTE_ARRAY label (UTF8); }",
            vec![ParquetColumn::Text(vec!["a triumph"]), ParquetColumn::Text(vec!["pos"])],
        );
        assert!(read_parquet(&path, &Columns::default()).is_err());
    }

    #[test]
    fn test_parquet_missing_column_and_negative_label() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.parquet");
        write_parquet(
            &path,
            "message schema { REQUIRED BYTE_ARRAY text (UTF8); }",
            vec![ParquetColumn::Text(vec!["unlabelled"])],
        );
        assert!(read_parquet(&path, &Columns::default()).is_err());

        write_parquet(
            &path,
            "message schema { REQUIRED BYTE_ARRAY text (UTF8); REQUIRED INT64 label; }",
            vec![ParquetColumn::Text(vec!["odd"]), ParquetColumn::Int64(vec![-1])],
        );
        let err = read_parquet(&path, &Columns::default()).unwrap_err();
        assert!(err.to_string().contains("negative label"));
    }

    #[test]
    fn test_custom_columns() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), "train", &[r#"{"sentence": "great", "sentiment": 1}"#]);
        let columns = Columns { text: "sentence".into(), label: "sentiment".into() };
        let records = LocalDataset::new(dir.path(), columns).load_split("train").unwrap();
        assert_eq!(records, vec![LabeledText::new("great", 1)]);
    }

    #[test]
    fn test_missing_split_and_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalDataset::new(dir.path(), Columns::default());
        assert!(source.load_split("validation").is_err());

        write_split(dir.path(), "train", &[r#"{"text": "no label"}"#]);
        assert!(source.load_split("train").is_err());
    }

    #[test]
    fn test_legacy_ids_are_canonicalised() {
        assert_eq!(canonical_dataset_id("rotten_tomatoes"), "cornell-movie-review-data/rotten_tomatoes");
        assert_eq!(canonical_dataset_id("stanfordnlp/imdb"), "stanfordnlp/imdb");
    }
}
