// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Loads the pretrained tokenizer that belongs to a model repo.
//
// Two files matter:
//   tokenizer.json         — the full tokenizer pipeline
//                            (normalizer, pre-tokenizer, model,
//                            post-processor, decoder)
//   tokenizer_config.json  — optional metadata: max length,
//                            padding side, special token names
//
// The tokenizer is immutable once loaded; the batched
// tokenization map clones it to attach padding/truncation.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use tokenizers::{Encoding, Tokenizer};

use crate::infra::hub::ModelRepo;

/// Lengths above this are the "unbounded" sentinel some repos store.
const UNBOUNDED_MAX_LENGTH: f64 = 1e9;

const SPECIAL_TOKEN_KEYS: [&str; 7] = [
    "bos_token", "eos_token", "unk_token", "sep_token", "pad_token", "cls_token", "mask_token",
];

pub struct TokenizerStore<'a> {
    repo: &'a ModelRepo,
}

impl<'a> TokenizerStore<'a> {
    pub fn new(repo: &'a ModelRepo) -> Self {
        Self { repo }
    }

    pub fn load(&self) -> Result<PretrainedTokenizer> {
        let path = self.repo.required("tokenizer.json")?;
        let tokenizer = Tokenizer::from_file(&path).map_err(|e| {
            anyhow::anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e)
        })?;

        let config = match self.repo.optional("tokenizer_config.json") {
            Some(cfg_path) => {
                let json = fs::read_to_string(&cfg_path)
                    .with_context(|| format!("Cannot read '{}'", cfg_path.display()))?;
                serde_json::from_str(&json)
                    .with_context(|| format!("Malformed '{}'", cfg_path.display()))?
            }
            None => Value::Null,
        };

        let loaded = PretrainedTokenizer::from_parts(tokenizer, self.repo.id(), &config);
        tracing::info!(
            "Loaded tokenizer for '{}' (vocab_size={})",
            self.repo.id(),
            loaded.vocab_size()
        );
        Ok(loaded)
    }
}

/// A tokenizer together with the metadata from its repository.
#[derive(Clone)]
pub struct PretrainedTokenizer {
    tokenizer: Tokenizer,
    name: String,
    model_max_length: Option<usize>,
    padding_side: String,
    truncation_side: String,
    /// role (e.g. "pad_token") → token content
    special_tokens: BTreeMap<String, String>,
}

impl PretrainedTokenizer {
    pub fn from_parts(tokenizer: Tokenizer, name: &str, config: &Value) -> Self {
        let model_max_length = config
            .get("model_max_length")
            .and_then(Value::as_f64)
            .filter(|len| *len > 0.0 && *len < UNBOUNDED_MAX_LENGTH)
            .map(|len| len as usize);

        let side = |key: &str| {
            config
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or("right")
                .to_string()
        };

        let special_tokens = SPECIAL_TOKEN_KEYS
            .iter()
            .filter_map(|key| {
                config
                    .get(*key)
                    .and_then(token_content)
                    .map(|content| (key.to_string(), content))
            })
            .collect();

        Self {
            tokenizer,
            name: name.to_string(),
            model_max_length,
            padding_side: side("padding_side"),
            truncation_side: side("truncation_side"),
            special_tokens,
        }
    }

    pub fn inner(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    pub fn model_max_length(&self) -> Option<usize> {
        self.model_max_length
    }

    pub fn special_token(&self, role: &str) -> Option<&str> {
        self.special_tokens.get(role).map(String::as_str)
    }

    pub fn token_id(&self, token: &str) -> Option<u32> {
        self.tokenizer.token_to_id(token)
    }

    /// Id of the padding token, falling back to the tokenizer's own padding setup.
    pub fn pad_token_id(&self) -> Option<u32> {
        self.special_token("pad_token")
            .and_then(|t| self.token_id(t))
            .or_else(|| self.tokenizer.get_padding().map(|p| p.pad_id))
    }

    pub fn pad_token(&self) -> Option<String> {
        self.special_token("pad_token")
            .map(String::from)
            .or_else(|| self.tokenizer.get_padding().map(|p| p.pad_token.clone()))
    }

    pub fn eos_token_id(&self) -> Option<u32> {
        self.special_token("eos_token").and_then(|t| self.token_id(t))
    }

    /// Compares the tokenizer vocabulary with the model's embedding rows.
    /// A mismatch is logged, not rejected: ids past the embedding would
    /// fail at lookup, a smaller tokenizer just leaves rows unused.
    pub fn check_model_vocab(&self, model_vocab_size: usize) -> bool {
        let vocab = self.vocab_size();
        if vocab != model_vocab_size {
            tracing::warn!(
                "Tokenizer '{}' has {} tokens but the model embeds {}",
                self.name,
                vocab,
                model_vocab_size
            );
        }
        vocab == model_vocab_size
    }

    pub fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Encoding> {
        self.tokenizer
            .encode(text, add_special_tokens)
            .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))
    }

    pub fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        self.tokenizer
            .decode(ids, skip_special_tokens)
            .map_err(|e| anyhow::anyhow!("Decode error: {e}"))
    }
}

/// Special tokens are stored either as plain strings or as
/// `{"content": "...", ...}` objects.
fn token_content(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o.get("content").and_then(Value::as_str).map(String::from),
        _ => None,
    }
}

impl fmt::Display for PretrainedTokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let max_len = self
            .model_max_length
            .map(|len| len.to_string())
            .unwrap_or_else(|| "unbounded".to_string());
        let specials: Vec<String> = self
            .special_tokens
            .iter()
            .map(|(role, token)| format!("'{role}': '{token}'"))
            .collect();

        writeln!(
            f,
            "PretrainedTokenizer(name_or_path='{}', vocab_size={}, model_max_length={}, \
             padding_side='{}', truncation_side='{}', special_tokens={{{}}})",
            self.name,
            self.vocab_size(),
            max_len,
            self.padding_side,
            self.truncation_side,
            specials.join(", "),
        )?;

        let mut added: Vec<_> = self.tokenizer.get_added_tokens_decoder().into_iter().collect();
        added.sort_by_key(|(id, _)| *id);
        write!(f, "added_tokens_decoder={{")?;
        for (id, token) in added {
            write!(f, "\n\t{id}: AddedToken(\"{}\", special={})", token.content, token.special)?;
        }
        write!(f, "\n}}")
    }
}

// ─── Test helpers ─────────────────────────────────────────────────────────────
/// Builds a small word-level tokenizer from a corpus. Special tokens
/// take the first ids in the order given; every other word follows in
/// descending frequency.
#[cfg(test)]
pub(crate) fn word_level_tokenizer(texts: &[&str], specials: &[&str]) -> Tokenizer {
    use std::collections::HashMap;

    let mut freq: HashMap<String, usize> = HashMap::new();
    for text in texts {
        for word in text.split_whitespace() {
            *freq.entry(word.to_lowercase()).or_insert(0) += 1;
        }
    }
    let mut words: Vec<(String, usize)> = freq.into_iter().collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut vocab = serde_json::Map::new();
    let mut added_tokens = Vec::new();
    for (id, token) in specials.iter().enumerate() {
        vocab.insert(token.to_string(), serde_json::json!(id));
        added_tokens.push(serde_json::json!({
            "id": id, "content": token, "single_word": false, "lstrip": false,
            "rstrip": false, "normalized": false, "special": true
        }));
    }
    for (word, _) in words {
        if !vocab.contains_key(&word) {
            let id = vocab.len();
            vocab.insert(word, serde_json::json!(id));
        }
    }

    let tokenizer_json = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": added_tokens,
        "normalizer": {"type": "Lowercase"},
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": specials.iter().find(|t| t.contains("unk") || t.contains("UNK")).copied().unwrap_or("[UNK]")
        }
    });

    tokenizer_json
        .to_string()
        .parse::<Tokenizer>()
        .expect("test tokenizer JSON is valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bert_like() -> PretrainedTokenizer {
        let tokenizer = word_level_tokenizer(
            &["a fine film", "a dull film"],
            &["[PAD]", "[UNK]", "[CLS]", "[SEP]"],
        );
        let config = serde_json::json!({
            "model_max_length": 512,
            "pad_token": "[PAD]",
            "unk_token": {"content": "[UNK]", "special": true},
        });
        PretrainedTokenizer::from_parts(tokenizer, "tiny-bert", &config)
    }

    #[test]
    fn test_metadata_from_config() {
        let tok = bert_like();
        assert_eq!(tok.model_max_length(), Some(512));
        assert_eq!(tok.pad_token_id(), Some(0));
        assert_eq!(tok.special_token("unk_token"), Some("[UNK]"));
        assert_eq!(tok.eos_token_id(), None);
    }

    #[test]
    fn test_vocab_check() {
        let tok = bert_like();
        assert!(tok.check_model_vocab(tok.vocab_size()));
        assert!(!tok.check_model_vocab(30522));
    }

    #[test]
    fn test_unbounded_max_length_is_dropped() {
        let tokenizer = word_level_tokenizer(&["x"], &["<unk>"]);
        let config = serde_json::json!({ "model_max_length": 1.0e30 });
        let tok = PretrainedTokenizer::from_parts(tokenizer, "llm", &config);
        assert_eq!(tok.model_max_length(), None);
    }

    #[test]
    fn test_encode_decode_words() {
        let tok = bert_like();
        let enc = tok.encode("A fine film", false).unwrap();
        assert_eq!(enc.get_ids().len(), 3);
        assert_eq!(tok.decode(enc.get_ids(), true).unwrap(), "a fine film");
    }

    #[test]
    fn test_display_lists_special_tokens() {
        let shown = bert_like().to_string();
        assert!(shown.contains("name_or_path='tiny-bert'"));
        assert!(shown.contains("'pad_token': '[PAD]'"));
        assert!(shown.contains("AddedToken(\"[CLS]\", special=true)"));
    }
}
