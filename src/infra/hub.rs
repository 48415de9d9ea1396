// ============================================================
// Layer 6 — Registry Access
// ============================================================
// Resolves model and dataset identifiers to files on disk.
//
// An identifier is either:
//   - a local directory (used as-is, nothing is downloaded)
//   - a hub repository id such as "distilbert-base-uncased",
//     fetched through the hf-hub cache
//
// Gated repositories (e.g. the Llama family) need a token:
// HF_TOKEN is forwarded when set, otherwise hf-hub falls back
// to the token written by `huggingface-cli login`.

use anyhow::{Context, Result};
use hf_hub::api::sync::{Api, ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Revision where the hub keeps auto-converted parquet shards
const PARQUET_REVISION: &str = "refs/convert/parquet";

/// Client over the hub's synchronous API.
pub struct HubClient {
    api: Api,
}

impl HubClient {
    pub fn new() -> Result<Self> {
        let mut builder = ApiBuilder::new().with_progress(true);
        if let Ok(token) = std::env::var("HF_TOKEN") {
            builder = builder.with_token(Some(token));
        }
        let api = builder.build().context("Cannot initialise the hub client")?;
        Ok(Self { api })
    }

    /// Resolve a model identifier. Nothing is fetched until a file is requested.
    pub fn model(&self, model_id: &str) -> ModelRepo {
        let path = Path::new(model_id);
        let location = if path.is_dir() {
            tracing::debug!("Using local model directory '{}'", path.display());
            RepoLocation::Local(path.to_path_buf())
        } else {
            RepoLocation::Hub(Box::new(self.api.model(model_id.to_string())))
        };
        ModelRepo { id: model_id.to_string(), location }
    }

    /// Fetch the parquet shard holding one split of a hub dataset.
    ///
    /// Tries `<split>.parquet` at the repo root first, then the
    /// auto-converted layout `default/<split>/0000.parquet`.
    pub fn dataset_split(&self, dataset_id: &str, split: &str) -> Result<PathBuf> {
        let root_file = format!("{split}.parquet");
        match self.api.dataset(dataset_id.to_string()).get(&root_file) {
            Ok(path) => return Ok(path),
            Err(e) => tracing::debug!("'{}' has no {}: {}", dataset_id, root_file, e),
        }

        let converted = self.api.repo(Repo::with_revision(
            dataset_id.to_string(),
            RepoType::Dataset,
            PARQUET_REVISION.to_string(),
        ));
        let shard = format!("default/{split}/0000.parquet");
        converted
            .get(&shard)
            .with_context(|| format!("Cannot fetch split '{split}' of dataset '{dataset_id}'"))
    }

    /// Names of the splits a hub dataset publishes as parquet.
    ///
    /// Looks at the repo's own files first, then at the
    /// auto-converted revision.
    pub fn dataset_splits(&self, dataset_id: &str) -> Result<Vec<String>> {
        let info = self
            .api
            .dataset(dataset_id.to_string())
            .info()
            .with_context(|| format!("Cannot list files of dataset '{dataset_id}'"))?;
        let splits = parquet_splits(info.siblings.iter().map(|s| s.rfilename.as_str()));
        if !splits.is_empty() {
            return Ok(splits);
        }

        let converted = self.api.repo(Repo::with_revision(
            dataset_id.to_string(),
            RepoType::Dataset,
            PARQUET_REVISION.to_string(),
        ));
        let info = converted
            .info()
            .with_context(|| format!("Cannot list parquet shards of dataset '{dataset_id}'"))?;
        Ok(parquet_splits(info.siblings.iter().map(|s| s.rfilename.as_str())))
    }
}

/// Split names from parquet file paths. Understands `<split>.parquet`,
/// `data/<split>-00000-of-00001.parquet` and `default/<split>/0000.parquet`.
fn parquet_splits<'a>(files: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut splits = BTreeSet::new();
    for file in files {
        let Some(stem) = file.strip_suffix(".parquet") else {
            continue;
        };
        let parts: Vec<&str> = stem.split('/').collect();
        let split = match parts.as_slice() {
            [name] => Some(*name),
            ["data", shard] => shard.split('-').next(),
            ["default", name, _] => Some(*name),
            _ => None,
        };
        if let Some(split) = split.filter(|s| !s.is_empty()) {
            splits.insert(split.to_string());
        }
    }
    splits.into_iter().collect()
}

enum RepoLocation {
    Local(PathBuf),
    Hub(Box<ApiRepo>),
}

/// A model repository, local or remote.
pub struct ModelRepo {
    id: String,
    location: RepoLocation,
}

#[derive(Debug, Deserialize)]
struct SafetensorsIndex {
    weight_map: HashMap<String, String>,
}

impl ModelRepo {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Fetch a file that must exist.
    pub fn required(&self, file: &str) -> Result<PathBuf> {
        match &self.location {
            RepoLocation::Local(dir) => {
                let path = dir.join(file);
                anyhow::ensure!(
                    path.exists(),
                    "'{}' is missing from '{}'",
                    file,
                    dir.display()
                );
                Ok(path)
            }
            RepoLocation::Hub(repo) => repo
                .get(file)
                .with_context(|| format!("Cannot fetch '{}' from '{}'", file, self.id)),
        }
    }

    /// Fetch a file that may be absent; absence is not an error.
    pub fn optional(&self, file: &str) -> Option<PathBuf> {
        match &self.location {
            RepoLocation::Local(dir) => Some(dir.join(file)).filter(|p| p.exists()),
            RepoLocation::Hub(repo) => match repo.get(file) {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::debug!("Optional '{}' not available for '{}': {}", file, self.id, e);
                    None
                }
            },
        }
    }

    pub fn config(&self) -> Result<PathBuf> {
        self.required("config.json")
    }

    /// All safetensors files holding the model weights, in a stable order.
    pub fn weight_files(&self) -> Result<Vec<PathBuf>> {
        let Some(index_path) = self.optional("model.safetensors.index.json") else {
            return Ok(vec![self.required("model.safetensors")?]);
        };

        let json = fs::read_to_string(&index_path)
            .with_context(|| format!("Cannot read '{}'", index_path.display()))?;
        let index: SafetensorsIndex = serde_json::from_str(&json)
            .with_context(|| format!("Malformed weight index '{}'", index_path.display()))?;

        let shards: BTreeSet<&String> = index.weight_map.values().collect();
        tracing::info!("'{}' is split over {} weight shards", self.id, shards.len());
        shards.into_iter().map(|shard| self.required(shard)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_repo(dir: &Path) -> ModelRepo {
        ModelRepo {
            id: dir.display().to_string(),
            location: RepoLocation::Local(dir.to_path_buf()),
        }
    }

    #[test]
    fn test_local_single_file_weights() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("model.safetensors"), b"").unwrap();
        let repo = local_repo(dir.path());
        let files = repo.weight_files().unwrap();
        assert_eq!(files, vec![dir.path().join("model.safetensors")]);
    }

    #[test]
    fn test_local_sharded_weights_are_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let index = serde_json::json!({
            "metadata": {"total_size": 0},
            "weight_map": {
                "a.weight": "model-00002-of-00002.safetensors",
                "b.weight": "model-00001-of-00002.safetensors",
                "c.weight": "model-00001-of-00002.safetensors"
            }
        });
        fs::write(dir.path().join("model.safetensors.index.json"), index.to_string()).unwrap();
        fs::write(dir.path().join("model-00001-of-00002.safetensors"), b"").unwrap();
        fs::write(dir.path().join("model-00002-of-00002.safetensors"), b"").unwrap();

        let files = local_repo(dir.path()).weight_files().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("model-00001-of-00002.safetensors"));
    }

    #[test]
    fn test_parquet_split_names() {
        let files = [
            "README.md",
            "train.parquet",
            "test.parquet",
            "data/validation-00000-of-00001.parquet",
            "default/unsupervised/0000.parquet",
            ".gitattributes",
        ];
        assert_eq!(parquet_splits(files), vec!["test", "train", "unsupervised", "validation"]);
        assert!(parquet_splits(["data.csv"]).is_empty());
    }

    #[test]
    fn test_missing_required_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let repo = local_repo(dir.path());
        assert!(repo.config().is_err());
        assert!(repo.optional("generation_config.json").is_none());
    }
}
