// ============================================================
// Layer 5 — Llama Causal Language Model
// ============================================================
// Decoder-only transformer used by the text-generation
// pipeline:
//
//   input_ids [batch, seq]
//     → token embedding
//     → N × decoder layer
//         h   = x + attn(rms_norm(x))        (RoPE, grouped KV heads)
//         out = h + mlp(rms_norm(h))         (SwiGLU)
//     → final RMSNorm
//     → lm_head → logits [batch, seq, vocab]
//
// Incremental decoding keeps the keys/values of every layer in
// a `KvCache`; each call only feeds the new tokens. The cache
// rows can be gathered (`reorder`) which both reorders beams
// and expands a single prefilled prompt into several rows.
//
// Reference: Touvron et al. (2023) Llama 2
//            Su et al. (2021) RoFormer

use anyhow::{ensure, Context, Result};
use burn::{
    module::Param,
    nn::{Embedding, EmbeddingConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation::{silu, softmax},
};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::infra::weights::WeightStore;

/// Added to masked attention scores.
const MASK_VALUE: f32 = -1.0e9;

// ─── Configuration ────────────────────────────────────────────────────────────

/// `eos_token_id` is a single id in older configs and a list in newer ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenIds {
    Single(u32),
    Many(Vec<u32>),
}

impl TokenIds {
    pub fn to_vec(&self) -> Vec<u32> {
        match self {
            Self::Single(id) => vec![*id],
            Self::Many(ids) => ids.clone(),
        }
    }
}

/// Fields of the model repo's `config.json`; unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlamaConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub num_key_value_heads: Option<usize>,
    pub max_position_embeddings: usize,
    pub rms_norm_eps: f64,
    pub rope_theta: f64,
    pub tie_word_embeddings: bool,
    pub bos_token_id: Option<u32>,
    pub eos_token_id: Option<TokenIds>,
    pub pad_token_id: Option<u32>,
    pub torch_dtype: Option<String>,
}

impl Default for LlamaConfig {
    fn default() -> Self {
        Self {
            vocab_size: 32000,
            hidden_size: 4096,
            intermediate_size: 11008,
            num_hidden_layers: 32,
            num_attention_heads: 32,
            num_key_value_heads: None,
            max_position_embeddings: 2048,
            rms_norm_eps: 1e-6,
            rope_theta: 10000.0,
            tie_word_embeddings: false,
            bos_token_id: Some(1),
            eos_token_id: Some(TokenIds::Single(2)),
            pad_token_id: None,
            torch_dtype: None,
        }
    }
}

impl LlamaConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read model config '{}'", path.display()))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("Malformed model config '{}'", path.display()))?;
        config.check()?;
        Ok(config)
    }

    pub fn num_kv_heads(&self) -> usize {
        self.num_key_value_heads.unwrap_or(self.num_attention_heads)
    }

    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    pub fn eos_token_ids(&self) -> Vec<u32> {
        self.eos_token_id.as_ref().map(TokenIds::to_vec).unwrap_or_default()
    }

    fn check(&self) -> Result<()> {
        ensure!(self.num_attention_heads > 0, "num_attention_heads must be positive");
        ensure!(
            self.hidden_size % self.num_attention_heads == 0,
            "hidden_size {} is not divisible by num_attention_heads {}",
            self.hidden_size,
            self.num_attention_heads
        );
        ensure!(
            self.num_kv_heads() > 0 && self.num_attention_heads % self.num_kv_heads() == 0,
            "num_attention_heads {} is not a multiple of num_key_value_heads {}",
            self.num_attention_heads,
            self.num_kv_heads()
        );
        ensure!(self.head_dim() % 2 == 0, "rotary embedding needs an even head_dim");
        Ok(())
    }

    /// Randomly initialised model, used for tests and smoke runs.
    pub fn init<B: Backend>(&self, device: &B::Device) -> LlamaForCausalLM<B> {
        let linear = |d_in: usize, d_out: usize| {
            LinearConfig::new(d_in, d_out).with_bias(false).init(device)
        };
        let (d, hd) = (self.hidden_size, self.head_dim());
        let layers = (0..self.num_hidden_layers)
            .map(|_| LlamaDecoderLayer {
                self_attn: LlamaAttention {
                    q_proj: linear(d, self.num_attention_heads * hd),
                    k_proj: linear(d, self.num_kv_heads() * hd),
                    v_proj: linear(d, self.num_kv_heads() * hd),
                    o_proj: linear(self.num_attention_heads * hd, d),
                    n_heads: self.num_attention_heads,
                    n_kv_heads: self.num_kv_heads(),
                    head_dim: hd,
                },
                mlp: LlamaMlp {
                    gate_proj: linear(d, self.intermediate_size),
                    up_proj: linear(d, self.intermediate_size),
                    down_proj: linear(self.intermediate_size, d),
                },
                input_layernorm: RmsNorm::ones(d, self.rms_norm_eps, device),
                post_attention_layernorm: RmsNorm::ones(d, self.rms_norm_eps, device),
            })
            .collect();

        LlamaForCausalLM {
            embed_tokens: EmbeddingConfig::new(self.vocab_size, d).init(device),
            layers,
            norm: RmsNorm::ones(d, self.rms_norm_eps, device),
            lm_head: linear(d, self.vocab_size),
            head_dim: hd,
            rope_theta: self.rope_theta,
        }
    }

    /// Build the model from hub weights (`model.layers.{i}.…` naming).
    pub fn load<B: Backend>(&self, store: &WeightStore, device: &B::Device) -> Result<LlamaForCausalLM<B>> {
        let (d, hd) = (self.hidden_size, self.head_dim());
        let (nh, nkv) = (self.num_attention_heads, self.num_kv_heads());
        let eps = self.rms_norm_eps;

        let mut layers = Vec::with_capacity(self.num_hidden_layers);
        for i in 0..self.num_hidden_layers {
            let p = format!("model.layers.{i}");
            layers.push(LlamaDecoderLayer {
                self_attn: LlamaAttention {
                    q_proj: store.linear(&format!("{p}.self_attn.q_proj"), d, nh * hd, false, device)?,
                    k_proj: store.linear(&format!("{p}.self_attn.k_proj"), d, nkv * hd, false, device)?,
                    v_proj: store.linear(&format!("{p}.self_attn.v_proj"), d, nkv * hd, false, device)?,
                    o_proj: store.linear(&format!("{p}.self_attn.o_proj"), nh * hd, d, false, device)?,
                    n_heads: nh,
                    n_kv_heads: nkv,
                    head_dim: hd,
                },
                mlp: LlamaMlp {
                    gate_proj: store.linear(&format!("{p}.mlp.gate_proj"), d, self.intermediate_size, false, device)?,
                    up_proj: store.linear(&format!("{p}.mlp.up_proj"), d, self.intermediate_size, false, device)?,
                    down_proj: store.linear(&format!("{p}.mlp.down_proj"), self.intermediate_size, d, false, device)?,
                },
                input_layernorm: RmsNorm::load(store, &format!("{p}.input_layernorm"), d, eps, device)?,
                post_attention_layernorm: RmsNorm::load(
                    store,
                    &format!("{p}.post_attention_layernorm"),
                    d,
                    eps,
                    device,
                )?,
            });
            tracing::debug!("Loaded decoder layer {}/{}", i + 1, self.num_hidden_layers);
        }

        let embed_tokens = store.embedding("model.embed_tokens.weight", self.vocab_size, d, device)?;
        let lm_head = if !self.tie_word_embeddings && store.contains("lm_head.weight") {
            store.linear("lm_head", d, self.vocab_size, false, device)?
        } else {
            tracing::info!("lm_head tied to the token embedding");
            let mut head = LinearConfig::new(d, self.vocab_size)
                .with_bias(false)
                .with_initializer(burn::nn::Initializer::Zeros)
                .init(device);
            head.weight = Param::from_tensor(embed_tokens.weight.val().transpose());
            head
        };

        Ok(LlamaForCausalLM {
            embed_tokens,
            layers,
            norm: RmsNorm::load(store, "model.norm", d, eps, device)?,
            lm_head,
            head_dim: hd,
            rope_theta: self.rope_theta,
        })
    }
}

// ─── RMSNorm ──────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct RmsNorm<B: Backend> {
    pub weight: Param<Tensor<B, 1>>,
    pub epsilon: f64,
}

impl<B: Backend> RmsNorm<B> {
    fn ones(d_model: usize, epsilon: f64, device: &B::Device) -> Self {
        Self { weight: Param::from_tensor(Tensor::ones([d_model], device)), epsilon }
    }

    fn load(store: &WeightStore, prefix: &str, d_model: usize, epsilon: f64, device: &B::Device) -> Result<Self> {
        let weight = store.tensor(&format!("{prefix}.weight"), [d_model], device)?;
        Ok(Self { weight: Param::from_tensor(weight), epsilon })
    }

    /// x / sqrt(mean(x²) + eps) * weight, over the last axis
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let variance = x.clone().powf_scalar(2.0).mean_dim(D - 1);
        let normed = x * variance.add_scalar(self.epsilon).sqrt().recip();
        normed * self.weight.val().unsqueeze::<D>()
    }
}

// ─── Rotary position embedding ────────────────────────────────────────────────

/// cos/sin tables for a run of positions, shaped [1, 1, seq, head_dim]
/// so they broadcast over batch and heads.
struct RotaryTables<B: Backend> {
    cos: Tensor<B, 4>,
    sin: Tensor<B, 4>,
}

impl<B: Backend> RotaryTables<B> {
    fn new(start: usize, len: usize, head_dim: usize, theta: f64, device: &B::Device) -> Self {
        let half = head_dim / 2;
        let mut cos = Vec::with_capacity(len * head_dim);
        let mut sin = Vec::with_capacity(len * head_dim);
        for pos in start..start + len {
            for i in 0..head_dim {
                let inv_freq = theta.powf(-((2 * (i % half)) as f64) / head_dim as f64);
                let angle = pos as f64 * inv_freq;
                cos.push(angle.cos() as f32);
                sin.push(angle.sin() as f32);
            }
        }
        let shape = [1, 1, len, head_dim];
        Self {
            cos: Tensor::from_data(TensorData::new(cos, shape), device),
            sin: Tensor::from_data(TensorData::new(sin, shape), device),
        }
    }

    /// x * cos + rotate_half(x) * sin
    fn apply(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let half = x.dims()[3] / 2;
        let x1 = x.clone().narrow(3, 0, half);
        let x2 = x.clone().narrow(3, half, half);
        let rotated = Tensor::cat(vec![x2.neg(), x1], 3);
        x * self.cos.clone() + rotated * self.sin.clone()
    }
}

// ─── Key/value cache ──────────────────────────────────────────────────────────

/// Keys and values of one layer, each [batch, kv_heads, seq, head_dim].
type LayerCache<B> = Option<(Tensor<B, 4>, Tensor<B, 4>)>;

pub struct KvCache<B: Backend> {
    layers: Vec<LayerCache<B>>,
}

impl<B: Backend> KvCache<B> {
    pub fn new(num_layers: usize) -> Self {
        Self { layers: (0..num_layers).map(|_| None).collect() }
    }

    /// Number of positions already cached.
    pub fn seq_len(&self) -> usize {
        self.layers
            .first()
            .and_then(|layer| layer.as_ref())
            .map_or(0, |(k, _)| k.dims()[2])
    }

    /// Gather batch rows: row `i` of the result is old row `indices[i]`.
    /// Repeating an index duplicates a row.
    pub fn reorder(&mut self, indices: &[usize]) {
        for (k, v) in self.layers.iter_mut().flatten() {
            let device = k.device();
            let idx = Tensor::<B, 1, Int>::from_data(
                TensorData::new(indices.iter().map(|&i| i as i64).collect::<Vec<_>>(), [indices.len()]),
                &device,
            );
            *k = k.clone().select(0, idx.clone());
            *v = v.clone().select(0, idx);
        }
    }
}

// ─── Layers ───────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct LlamaAttention<B: Backend> {
    pub q_proj: Linear<B>,
    pub k_proj: Linear<B>,
    pub v_proj: Linear<B>,
    pub o_proj: Linear<B>,
    pub n_heads: usize,
    pub n_kv_heads: usize,
    pub head_dim: usize,
}

impl<B: Backend> LlamaAttention<B> {
    fn forward(
        &self,
        x: Tensor<B, 3>,
        rope: &RotaryTables<B>,
        mask: Option<Tensor<B, 4>>,
        cache: &mut LayerCache<B>,
    ) -> Tensor<B, 3> {
        let [batch, seq, _] = x.dims();
        let heads = |t: Tensor<B, 3>, n: usize| t.reshape([batch, seq, n, self.head_dim]).swap_dims(1, 2);

        let q = rope.apply(heads(self.q_proj.forward(x.clone()), self.n_heads));
        let k = rope.apply(heads(self.k_proj.forward(x.clone()), self.n_kv_heads));
        let v = heads(self.v_proj.forward(x), self.n_kv_heads);

        let (k, v) = match cache.take() {
            Some((past_k, past_v)) => (Tensor::cat(vec![past_k, k], 2), Tensor::cat(vec![past_v, v], 2)),
            None => (k, v),
        };
        *cache = Some((k.clone(), v.clone()));

        let n_rep = self.n_heads / self.n_kv_heads;
        let k = repeat_kv(k, n_rep);
        let v = repeat_kv(v, n_rep);

        let mut scores = q.matmul(k.swap_dims(2, 3)).div_scalar((self.head_dim as f64).sqrt());
        if let Some(mask) = mask {
            scores = scores + mask;
        }
        let context = softmax(scores, 3)
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, seq, self.n_heads * self.head_dim]);
        self.o_proj.forward(context)
    }
}

/// [b, kv_heads, t, d] → [b, kv_heads * n_rep, t, d], each kv head repeated in place.
fn repeat_kv<B: Backend>(x: Tensor<B, 4>, n_rep: usize) -> Tensor<B, 4> {
    if n_rep == 1 {
        return x;
    }
    let [b, kv_heads, t, d] = x.dims();
    Tensor::cat(vec![x.unsqueeze_dim::<5>(2); n_rep], 2).reshape([b, kv_heads * n_rep, t, d])
}

#[derive(Module, Debug)]
pub struct LlamaMlp<B: Backend> {
    pub gate_proj: Linear<B>,
    pub up_proj: Linear<B>,
    pub down_proj: Linear<B>,
}

impl<B: Backend> LlamaMlp<B> {
    fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let gate = silu(self.gate_proj.forward(x.clone()));
        self.down_proj.forward(gate * self.up_proj.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct LlamaDecoderLayer<B: Backend> {
    pub self_attn: LlamaAttention<B>,
    pub mlp: LlamaMlp<B>,
    pub input_layernorm: RmsNorm<B>,
    pub post_attention_layernorm: RmsNorm<B>,
}

impl<B: Backend> LlamaDecoderLayer<B> {
    fn forward(
        &self,
        x: Tensor<B, 3>,
        rope: &RotaryTables<B>,
        mask: Option<Tensor<B, 4>>,
        cache: &mut LayerCache<B>,
    ) -> Tensor<B, 3> {
        let h = x.clone() + self.self_attn.forward(self.input_layernorm.forward(x), rope, mask, cache);
        h.clone() + self.mlp.forward(self.post_attention_layernorm.forward(h))
    }
}

#[derive(Module, Debug)]
pub struct LlamaForCausalLM<B: Backend> {
    pub embed_tokens: Embedding<B>,
    pub layers: Vec<LlamaDecoderLayer<B>>,
    pub norm: RmsNorm<B>,
    pub lm_head: Linear<B>,
    pub head_dim: usize,
    pub rope_theta: f64,
}

impl<B: Backend> LlamaForCausalLM<B> {
    pub fn new_cache(&self) -> KvCache<B> {
        KvCache::new(self.layers.len())
    }

    /// Feed `input_ids` [batch, seq] after whatever the cache already holds.
    /// Returns logits [batch, seq, vocab] and extends the cache.
    pub fn forward(&self, input_ids: Tensor<B, 2, Int>, cache: &mut KvCache<B>) -> Tensor<B, 3> {
        let device = input_ids.device();
        let seq = input_ids.dims()[1];
        let past = cache.seq_len();

        let rope = RotaryTables::new(past, seq, self.head_dim, self.rope_theta, &device);
        // single-token steps attend to everything cached, no mask needed
        let mask = (seq > 1).then(|| causal_mask::<B>(past, seq, &device));

        let mut x = self.embed_tokens.forward(input_ids);
        for (layer, layer_cache) in self.layers.iter().zip(cache.layers.iter_mut()) {
            x = layer.forward(x, &rope, mask.clone(), layer_cache);
        }
        self.lm_head.forward(self.norm.forward(x))
    }
}

/// [1, 1, seq, past + seq]: query i may see key j when j ≤ past + i.
fn causal_mask<B: Backend>(past: usize, seq: usize, device: &B::Device) -> Tensor<B, 4> {
    let total = past + seq;
    let values: Vec<f32> = (0..seq)
        .flat_map(|i| (0..total).map(move |j| if j <= past + i { 0.0 } else { MASK_VALUE }))
        .collect();
    Tensor::from_data(TensorData::new(values, [1, 1, seq, total]), device)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    pub(crate) fn tiny_config(vocab_size: usize) -> LlamaConfig {
        LlamaConfig {
            vocab_size,
            hidden_size: 16,
            intermediate_size: 32,
            num_hidden_layers: 2,
            num_attention_heads: 4,
            num_key_value_heads: Some(2),
            max_position_embeddings: 64,
            eos_token_id: Some(TokenIds::Single(2)),
            ..Default::default()
        }
    }

    fn ids(values: &[i64], device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 2, Int> {
        Tensor::from_data(TensorData::new(values.to_vec(), [1, values.len()]), device)
    }

    fn last_row(logits: Tensor<TestBackend, 3>) -> Vec<f32> {
        let [b, s, v] = logits.dims();
        logits.slice([0..b, s - 1..s, 0..v]).into_data().to_vec().unwrap()
    }

    #[test]
    fn test_config_parses_hub_json() {
        let json = r#"{"architectures": ["LlamaForCausalLM"], "hidden_size": 64,
            "num_attention_heads": 8, "num_key_value_heads": 2, "eos_token_id": [2, 7],
            "rms_norm_eps": 1e-05}"#;
        let config: LlamaConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.head_dim(), 8);
        assert_eq!(config.num_kv_heads(), 2);
        assert_eq!(config.eos_token_ids(), vec![2, 7]);
        assert_eq!(config.vocab_size, 32000);
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model = tiny_config(20).init::<TestBackend>(&device);
        let mut cache = model.new_cache();
        let logits = model.forward(ids(&[1, 5, 6, 7], &device), &mut cache);
        assert_eq!(logits.dims(), [1, 4, 20]);
        assert_eq!(cache.seq_len(), 4);
    }

    #[test]
    fn test_cached_decoding_matches_full_forward() {
        let device = Default::default();
        let model = tiny_config(20).init::<TestBackend>(&device);

        let mut full_cache = model.new_cache();
        let full = last_row(model.forward(ids(&[1, 5, 6, 7, 9], &device), &mut full_cache));

        let mut cache = model.new_cache();
        model.forward(ids(&[1, 5, 6, 7], &device), &mut cache);
        let step = last_row(model.forward(ids(&[9], &device), &mut cache));

        for (a, b) in full.iter().zip(&step) {
            approx::assert_abs_diff_eq!(a, b, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_reorder_duplicates_rows() {
        let device = Default::default();
        let model = tiny_config(20).init::<TestBackend>(&device);
        let mut cache = model.new_cache();
        model.forward(ids(&[1, 5, 6], &device), &mut cache);

        cache.reorder(&[0, 0, 0]);
        let next = Tensor::<TestBackend, 2, Int>::from_data(TensorData::new(vec![4i64, 4, 4], [3, 1]), &device);
        let logits = model.forward(next, &mut cache);
        assert_eq!(logits.dims(), [3, 1, 20]);

        let rows: Vec<f32> = logits.into_data().to_vec().unwrap();
        let (first, rest) = rows.split_at(20);
        for (a, b) in first.iter().zip(rest.iter().take(20)) {
            approx::assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_rms_norm_unit_scale() {
        let device = Default::default();
        let norm = RmsNorm::<TestBackend>::ones(2, 0.0, &device);
        let x = Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![3.0f32, 4.0], [1, 2]), &device);
        let y: Vec<f32> = norm.forward(x).into_data().to_vec().unwrap();
        // rms of (3, 4) is sqrt(12.5)
        approx::assert_abs_diff_eq!(y[0], 3.0 / 12.5f32.sqrt(), epsilon = 1e-5);
    }

    #[test]
    fn test_load_from_safetensors() {
        use crate::infra::weights::write_safetensors;

        let config = LlamaConfig {
            vocab_size: 6,
            hidden_size: 4,
            intermediate_size: 8,
            num_hidden_layers: 1,
            num_attention_heads: 2,
            num_key_value_heads: Some(1),
            tie_word_embeddings: true,
            ..Default::default()
        };
        let p = "model.layers.0";
        let t = |name: &str, shape: Vec<usize>| {
            let n = shape.iter().product();
            (name.to_string(), shape, vec![0.01f32; n])
        };
        let tensors = vec![
            t("model.embed_tokens.weight", vec![6, 4]),
            t(&format!("{p}.self_attn.q_proj.weight"), vec![4, 4]),
            t(&format!("{p}.self_attn.k_proj.weight"), vec![2, 4]),
            t(&format!("{p}.self_attn.v_proj.weight"), vec![2, 4]),
            t(&format!("{p}.self_attn.o_proj.weight"), vec![4, 4]),
            t(&format!("{p}.mlp.gate_proj.weight"), vec![8, 4]),
            t(&format!("{p}.mlp.up_proj.weight"), vec![8, 4]),
            t(&format!("{p}.mlp.down_proj.weight"), vec![4, 8]),
            t(&format!("{p}.input_layernorm.weight"), vec![4]),
            t(&format!("{p}.post_attention_layernorm.weight"), vec![4]),
            t("model.norm.weight", vec![4]),
        ];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        write_safetensors(&path, &tensors);

        let store = WeightStore::open(&[path]).unwrap();
        let device = Default::default();
        let model = config.load::<TestBackend>(&store, &device).unwrap();
        assert_eq!(model.lm_head.weight.val().dims(), [4, 6]);

        let mut cache = model.new_cache();
        assert_eq!(model.forward(ids(&[1, 2], &device), &mut cache).dims(), [1, 2, 6]);
    }
}
