// ============================================================
// Layer 5 — DistilBERT Sequence Classifier
// ============================================================
// Encoder-only transformer with a classification head:
//
//   input_ids [batch, seq], attention_mask [batch, seq]
//     → word + position embeddings → LayerNorm → dropout
//     → N × transformer block
//         x = LN(x + attn(x, mask))              (post-LN)
//         x = LN(x + ffn(x))                     (GELU)
//     → hidden state of the first token
//     → pre_classifier → ReLU → dropout
//     → classifier → logits [batch, num_labels]
//
// The encoder comes from the pretrained checkpoint; the head
// is new and starts from normal(0, initializer_range) weights.
//
// Reference: Sanh et al. (2019) DistilBERT
//            Burn Book §3 (Building Blocks)

use anyhow::{ensure, Context, Result};
use burn::{
    module::Param,
    nn::{
        Dropout, DropoutConfig, Embedding, EmbeddingConfig, Initializer, LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::{gelu, relu, softmax},
};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::infra::weights::WeightStore;

const LAYER_NORM_EPS: f64 = 1e-12;
const MASK_VALUE: f64 = -1.0e9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistilBertConfig {
    pub vocab_size: usize,
    pub max_position_embeddings: usize,
    pub dim: usize,
    pub n_layers: usize,
    pub n_heads: usize,
    pub hidden_dim: usize,
    pub dropout: f64,
    pub attention_dropout: f64,
    pub activation: String,
    pub seq_classif_dropout: f64,
    pub initializer_range: f64,
    pub pad_token_id: usize,
}

impl Default for DistilBertConfig {
    fn default() -> Self {
        Self {
            vocab_size: 30522,
            max_position_embeddings: 512,
            dim: 768,
            n_layers: 6,
            n_heads: 12,
            hidden_dim: 3072,
            dropout: 0.1,
            attention_dropout: 0.1,
            activation: "gelu".to_string(),
            seq_classif_dropout: 0.2,
            initializer_range: 0.02,
            pad_token_id: 0,
        }
    }
}

impl DistilBertConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read model config '{}'", path.display()))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("Malformed model config '{}'", path.display()))?;
        ensure!(
            config.n_heads > 0 && config.dim % config.n_heads == 0,
            "dim {} is not divisible by n_heads {}",
            config.dim,
            config.n_heads
        );
        ensure!(
            matches!(config.activation.as_str(), "gelu" | "relu"),
            "Unsupported activation '{}'",
            config.activation
        );
        Ok(config)
    }

    /// Fully random model, used for tests.
    pub fn init<B: Backend>(&self, num_labels: usize, device: &B::Device) -> DistilBertForSequenceClassification<B> {
        let layers = (0..self.n_layers)
            .map(|_| TransformerBlock {
                attention: MultiHeadSelfAttention {
                    q_lin: LinearConfig::new(self.dim, self.dim).init(device),
                    k_lin: LinearConfig::new(self.dim, self.dim).init(device),
                    v_lin: LinearConfig::new(self.dim, self.dim).init(device),
                    out_lin: LinearConfig::new(self.dim, self.dim).init(device),
                    dropout: DropoutConfig::new(self.attention_dropout).init(),
                    n_heads: self.n_heads,
                },
                sa_layer_norm: self.layer_norm(device),
                ffn: FeedForward {
                    lin1: LinearConfig::new(self.dim, self.hidden_dim).init(device),
                    lin2: LinearConfig::new(self.hidden_dim, self.dim).init(device),
                    dropout: DropoutConfig::new(self.dropout).init(),
                    relu: self.activation == "relu",
                },
                output_layer_norm: self.layer_norm(device),
            })
            .collect();

        let distilbert = DistilBertModel {
            embeddings: Embeddings {
                word_embeddings: EmbeddingConfig::new(self.vocab_size, self.dim).init(device),
                position_embeddings: EmbeddingConfig::new(self.max_position_embeddings, self.dim)
                    .init(device),
                layer_norm: self.layer_norm(device),
                dropout: DropoutConfig::new(self.dropout).init(),
            },
            layers,
        };
        self.with_new_head(distilbert, num_labels, device)
    }

    /// Pretrained encoder plus a freshly initialised head, unless the
    /// checkpoint already carries one for the same number of labels.
    pub fn load<B: Backend>(
        &self,
        store: &WeightStore,
        num_labels: usize,
        device: &B::Device,
    ) -> Result<DistilBertForSequenceClassification<B>> {
        // checkpoints saved from the bare encoder have no prefix
        let prefix = if store.contains("distilbert.embeddings.word_embeddings.weight") {
            "distilbert."
        } else {
            ""
        };
        let d = self.dim;

        let mut layers = Vec::with_capacity(self.n_layers);
        for i in 0..self.n_layers {
            let p = format!("{prefix}transformer.layer.{i}");
            let lin = |name: &str, d_in: usize, d_out: usize| {
                store.linear::<B>(&format!("{p}.{name}"), d_in, d_out, true, device)
            };
            layers.push(TransformerBlock {
                attention: MultiHeadSelfAttention {
                    q_lin: lin("attention.q_lin", d, d)?,
                    k_lin: lin("attention.k_lin", d, d)?,
                    v_lin: lin("attention.v_lin", d, d)?,
                    out_lin: lin("attention.out_lin", d, d)?,
                    dropout: DropoutConfig::new(self.attention_dropout).init(),
                    n_heads: self.n_heads,
                },
                sa_layer_norm: store.layer_norm(&format!("{p}.sa_layer_norm"), d, LAYER_NORM_EPS, device)?,
                ffn: FeedForward {
                    lin1: lin("ffn.lin1", d, self.hidden_dim)?,
                    lin2: lin("ffn.lin2", self.hidden_dim, d)?,
                    dropout: DropoutConfig::new(self.dropout).init(),
                    relu: self.activation == "relu",
                },
                output_layer_norm: store.layer_norm(
                    &format!("{p}.output_layer_norm"),
                    d,
                    LAYER_NORM_EPS,
                    device,
                )?,
            });
        }

        let e = format!("{prefix}embeddings");
        let distilbert = DistilBertModel {
            embeddings: Embeddings {
                word_embeddings: store.embedding(
                    &format!("{e}.word_embeddings.weight"),
                    self.vocab_size,
                    d,
                    device,
                )?,
                position_embeddings: store.embedding(
                    &format!("{e}.position_embeddings.weight"),
                    self.max_position_embeddings,
                    d,
                    device,
                )?,
                layer_norm: store.layer_norm(&format!("{e}.LayerNorm"), d, LAYER_NORM_EPS, device)?,
                dropout: DropoutConfig::new(self.dropout).init(),
            },
            layers,
        };

        let has_head = store.contains("classifier.weight")
            && store.values("classifier.bias").map(|(_, s)| s == [num_labels]).unwrap_or(false);
        if has_head {
            tracing::info!("Using the classification head stored in the checkpoint");
            return Ok(DistilBertForSequenceClassification {
                distilbert,
                pre_classifier: store.linear("pre_classifier", d, d, true, device)?,
                classifier: store.linear("classifier", d, num_labels, true, device)?,
                dropout: DropoutConfig::new(self.seq_classif_dropout).init(),
                num_labels,
            });
        }

        tracing::warn!(
            "Some weights of DistilBertForSequenceClassification were not initialized from the \
             model checkpoint and are newly initialized: ['pre_classifier.weight', \
             'pre_classifier.bias', 'classifier.weight', 'classifier.bias']. \
             You should probably TRAIN this model on a down-stream task."
        );
        Ok(self.with_new_head(distilbert, num_labels, device))
    }

    fn layer_norm<B: Backend>(&self, device: &B::Device) -> LayerNorm<B> {
        LayerNormConfig::new(self.dim).with_epsilon(LAYER_NORM_EPS).init(device)
    }

    fn head_linear<B: Backend>(&self, d_output: usize, device: &B::Device) -> Linear<B> {
        let mut linear = LinearConfig::new(self.dim, d_output)
            .with_initializer(Initializer::Normal { mean: 0.0, std: self.initializer_range })
            .init(device);
        linear.bias = Some(Param::from_tensor(Tensor::zeros([d_output], device)));
        linear
    }

    fn with_new_head<B: Backend>(
        &self,
        distilbert: DistilBertModel<B>,
        num_labels: usize,
        device: &B::Device,
    ) -> DistilBertForSequenceClassification<B> {
        DistilBertForSequenceClassification {
            distilbert,
            pre_classifier: self.head_linear(self.dim, device),
            classifier: self.head_linear(num_labels, device),
            dropout: DropoutConfig::new(self.seq_classif_dropout).init(),
            num_labels,
        }
    }
}

// ─── Encoder ──────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct Embeddings<B: Backend> {
    pub word_embeddings: Embedding<B>,
    pub position_embeddings: Embedding<B>,
    pub layer_norm: LayerNorm<B>,
    pub dropout: Dropout,
}

impl<B: Backend> Embeddings<B> {
    fn forward(&self, input_ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let seq_len = input_ids.dims()[1];
        let device = input_ids.device();
        let words = self.word_embeddings.forward(input_ids);
        // [1, seq, dim] broadcasts over the batch
        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &device).unsqueeze::<2>();
        let positions = self.position_embeddings.forward(positions);
        self.dropout.forward(self.layer_norm.forward(words + positions))
    }
}

#[derive(Module, Debug)]
pub struct MultiHeadSelfAttention<B: Backend> {
    pub q_lin: Linear<B>,
    pub k_lin: Linear<B>,
    pub v_lin: Linear<B>,
    pub out_lin: Linear<B>,
    pub dropout: Dropout,
    pub n_heads: usize,
}

impl<B: Backend> MultiHeadSelfAttention<B> {
    /// `mask` is additive, [batch, 1, 1, seq]: 0 for tokens, a large negative for padding.
    fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 4>) -> Tensor<B, 3> {
        let [batch, seq, dim] = x.dims();
        let head_dim = dim / self.n_heads;
        let heads = |t: Tensor<B, 3>| t.reshape([batch, seq, self.n_heads, head_dim]).swap_dims(1, 2);

        let q = heads(self.q_lin.forward(x.clone())).div_scalar((head_dim as f64).sqrt());
        let k = heads(self.k_lin.forward(x.clone()));
        let v = heads(self.v_lin.forward(x));

        let weights = self.dropout.forward(softmax(q.matmul(k.swap_dims(2, 3)) + mask, 3));
        let context = weights.matmul(v).swap_dims(1, 2).reshape([batch, seq, dim]);
        self.out_lin.forward(context)
    }
}

#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    pub lin1: Linear<B>,
    pub lin2: Linear<B>,
    pub dropout: Dropout,
    /// ReLU instead of GELU
    pub relu: bool,
}

impl<B: Backend> FeedForward<B> {
    fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let h = self.lin1.forward(x);
        let h = if self.relu { relu(h) } else { gelu(h) };
        self.dropout.forward(self.lin2.forward(h))
    }
}

#[derive(Module, Debug)]
pub struct TransformerBlock<B: Backend> {
    pub attention: MultiHeadSelfAttention<B>,
    pub sa_layer_norm: LayerNorm<B>,
    pub ffn: FeedForward<B>,
    pub output_layer_norm: LayerNorm<B>,
}

impl<B: Backend> TransformerBlock<B> {
    fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 4>) -> Tensor<B, 3> {
        let x = self.sa_layer_norm.forward(x.clone() + self.attention.forward(x, mask));
        self.output_layer_norm.forward(x.clone() + self.ffn.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct DistilBertModel<B: Backend> {
    pub embeddings: Embeddings<B>,
    pub layers: Vec<TransformerBlock<B>>,
}

impl<B: Backend> DistilBertModel<B> {
    /// Rows of the position embedding table.
    pub fn max_positions(&self) -> usize {
        self.embeddings.position_embeddings.weight.dims()[0]
    }

    /// Last hidden state [batch, seq, dim].
    pub fn forward(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [batch, seq] = attention_mask.dims();
        let mask = attention_mask
            .float()
            .sub_scalar(1.0)
            .mul_scalar(-MASK_VALUE)
            .reshape([batch, 1, 1, seq]);

        let mut x = self.embeddings.forward(input_ids);
        for layer in &self.layers {
            x = layer.forward(x, mask.clone());
        }
        x
    }
}

// ─── Classification head ──────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct DistilBertForSequenceClassification<B: Backend> {
    pub distilbert: DistilBertModel<B>,
    pub pre_classifier: Linear<B>,
    pub classifier: Linear<B>,
    pub dropout: Dropout,
    pub num_labels: usize,
}

impl<B: Backend> DistilBertForSequenceClassification<B> {
    /// Logits [batch, num_labels].
    pub fn forward(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        let hidden = self.distilbert.forward(input_ids, attention_mask);
        let [batch, _, dim] = hidden.dims();
        let pooled = hidden.slice([0..batch, 0..1, 0..dim]).reshape([batch, dim]);
        let pooled = self.dropout.forward(relu(self.pre_classifier.forward(pooled)));
        self.classifier.forward(pooled)
    }
}
