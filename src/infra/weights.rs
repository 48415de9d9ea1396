// ============================================================
// Layer 6 — Pretrained Weight Store
// ============================================================
// Reads safetensors files (single file or shards) through a
// memory map and hands out burn tensors by parameter name.
//
// Conventions when moving hub weights into burn modules:
//   - every payload is widened to f32 (F16 / BF16 / F32 accepted)
//   - linear weights are stored [out, in] on the hub and
//     [in, out] in burn, so they are transposed on load
//   - modules are built with lazy zero-initialised params and
//     the params are replaced before anything reads them, so
//     no random weights are ever materialised

use anyhow::{bail, Context, Result};
use burn::{
    module::Param,
    nn::{
        Embedding, EmbeddingConfig, Initializer, LayerNorm, LayerNormConfig, Linear,
        LinearConfig,
    },
    prelude::*,
};
use memmap2::Mmap;
use safetensors::{Dtype, SafeTensors};
use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;

pub struct WeightStore {
    shards: Vec<Mmap>,
    /// parameter name → shard index
    locations: HashMap<String, usize>,
}

impl WeightStore {
    /// Memory-map every file and index the tensor names it holds.
    pub fn open(paths: &[PathBuf]) -> Result<Self> {
        let mut shards = Vec::with_capacity(paths.len());
        let mut locations = HashMap::new();

        for (idx, path) in paths.iter().enumerate() {
            let file = File::open(path)
                .with_context(|| format!("Cannot open weights '{}'", path.display()))?;
            // SAFETY: the file is only read, and hub cache files are never
            // rewritten in place.
            let mmap = unsafe { Mmap::map(&file) }
                .with_context(|| format!("Cannot map weights '{}'", path.display()))?;

            let tensors = SafeTensors::deserialize(&mmap)
                .with_context(|| format!("Malformed safetensors file '{}'", path.display()))?;
            for name in tensors.names() {
                locations.insert(name.clone(), idx);
            }
            drop(tensors);
            shards.push(mmap);
        }

        tracing::info!(
            "Indexed {} tensors across {} weight files",
            locations.len(),
            shards.len()
        );
        Ok(Self { shards, locations })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.locations.contains_key(name)
    }

    /// Raw f32 values and shape of a named tensor.
    pub fn values(&self, name: &str) -> Result<(Vec<f32>, Vec<usize>)> {
        let idx = *self
            .locations
            .get(name)
            .with_context(|| format!("Tensor '{name}' not found in the checkpoint"))?;
        let tensors = SafeTensors::deserialize(&self.shards[idx])?;
        let view = tensors.tensor(name)?;
        let values = decode_f32(view.dtype(), view.data())
            .with_context(|| format!("Cannot decode tensor '{name}'"))?;
        Ok((values, view.shape().to_vec()))
    }

    /// Load a named tensor, checking its shape against `expected`.
    pub fn tensor<B: Backend, const D: usize>(
        &self,
        name: &str,
        expected: [usize; D],
        device: &B::Device,
    ) -> Result<Tensor<B, D>> {
        let (values, shape) = self.values(name)?;
        if shape.as_slice() != expected.as_slice() {
            bail!("Tensor '{name}' has shape {shape:?}, expected {expected:?}");
        }
        Ok(Tensor::from_data(TensorData::new(values, shape), device))
    }

    /// Build a linear layer from `<prefix>.weight` (and `<prefix>.bias` when `bias`).
    pub fn linear<B: Backend>(
        &self,
        prefix: &str,
        d_input: usize,
        d_output: usize,
        bias: bool,
        device: &B::Device,
    ) -> Result<Linear<B>> {
        let mut linear = LinearConfig::new(d_input, d_output)
            .with_bias(bias)
            .with_initializer(Initializer::Zeros)
            .init(device);

        let weight: Tensor<B, 2> =
            self.tensor(&format!("{prefix}.weight"), [d_output, d_input], device)?;
        linear.weight = Param::from_tensor(weight.transpose());

        if bias {
            let b = self.tensor(&format!("{prefix}.bias"), [d_output], device)?;
            linear.bias = Some(Param::from_tensor(b));
        }
        Ok(linear)
    }

    pub fn embedding<B: Backend>(
        &self,
        name: &str,
        n_embedding: usize,
        d_model: usize,
        device: &B::Device,
    ) -> Result<Embedding<B>> {
        let mut embedding = EmbeddingConfig::new(n_embedding, d_model)
            .with_initializer(Initializer::Zeros)
            .init(device);
        embedding.weight = Param::from_tensor(self.tensor(name, [n_embedding, d_model], device)?);
        Ok(embedding)
    }

    /// LayerNorm from `<prefix>.weight/.bias`, accepting the older
    /// `<prefix>.gamma/.beta` naming some checkpoints still use.
    pub fn layer_norm<B: Backend>(
        &self,
        prefix: &str,
        d_model: usize,
        epsilon: f64,
        device: &B::Device,
    ) -> Result<LayerNorm<B>> {
        let mut norm = LayerNormConfig::new(d_model).with_epsilon(epsilon).init(device);
        let (scale, shift) = if self.contains(&format!("{prefix}.gamma")) {
            ("gamma", "beta")
        } else {
            ("weight", "bias")
        };
        norm.gamma = Param::from_tensor(self.tensor(&format!("{prefix}.{scale}"), [d_model], device)?);
        norm.beta = Param::from_tensor(self.tensor(&format!("{prefix}.{shift}"), [d_model], device)?);
        Ok(norm)
    }
}

fn decode_f32(dtype: Dtype, bytes: &[u8]) -> Result<Vec<f32>> {
    let values = match dtype {
        Dtype::F32 => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        Dtype::F16 => bytes
            .chunks_exact(2)
            .map(|c| half::f16::from_bits(u16::from_le_bytes([c[0], c[1]])).to_f32())
            .collect(),
        Dtype::BF16 => bytes
            .chunks_exact(2)
            .map(|c| half::bf16::from_bits(u16::from_le_bytes([c[0], c[1]])).to_f32())
            .collect(),
        other => bail!("Unsupported weight dtype {other:?}"),
    };
    Ok(values)
}

// ─── Test helpers ─────────────────────────────────────────────────────────────
/// Writes named f32 tensors into a safetensors file, used by the model
/// tests to fake a hub checkpoint.
#[cfg(test)]
pub(crate) fn write_safetensors(
    path: &std::path::Path,
    tensors: &[(String, Vec<usize>, Vec<f32>)],
) {
    use safetensors::tensor::TensorView;

    let bytes: Vec<Vec<u8>> = tensors
        .iter()
        .map(|(_, _, values)| values.iter().flat_map(|v| v.to_le_bytes()).collect())
        .collect();
    let views: Vec<(String, TensorView<'_>)> = tensors
        .iter()
        .zip(&bytes)
        .map(|((name, shape, _), data)| {
            (name.clone(), TensorView::new(Dtype::F32, shape.clone(), data).unwrap())
        })
        .collect();
    let serialized = safetensors::serialize(views.iter().map(|(n, v)| (n.as_str(), v)), &None).unwrap();
    std::fs::write(path, serialized).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_decode_half_precision() {
        let one_bf16 = half::bf16::from_f32(1.5).to_bits().to_le_bytes();
        let one_f16 = half::f16::from_f32(-2.0).to_bits().to_le_bytes();
        assert_eq!(decode_f32(Dtype::BF16, &one_bf16).unwrap(), vec![1.5]);
        assert_eq!(decode_f32(Dtype::F16, &one_f16).unwrap(), vec![-2.0]);
        assert!(decode_f32(Dtype::I64, &[0u8; 8]).is_err());
    }

    #[test]
    fn test_linear_weight_is_transposed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        // hub layout [out=3, in=2]
        write_safetensors(
            &path,
            &[
                ("proj.weight".into(), vec![3, 2], vec![1., 2., 3., 4., 5., 6.]),
                ("proj.bias".into(), vec![3], vec![0.5, 0.5, 0.5]),
            ],
        );

        let store = WeightStore::open(&[path]).unwrap();
        let device = Default::default();
        let linear = store.linear::<TestBackend>("proj", 2, 3, true, &device).unwrap();

        assert_eq!(linear.weight.val().dims(), [2, 3]);
        let x = Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![1.0f32, 0.0], [1, 2]), &device);
        let y: Vec<f32> = linear.forward(x).into_data().to_vec().unwrap();
        // first input column picks weights 1, 3, 5
        assert_eq!(y, vec![1.5, 3.5, 5.5]);
    }

    #[test]
    fn test_shape_mismatch_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        write_safetensors(&path, &[("emb".into(), vec![4, 2], vec![0.0; 8])]);

        let store = WeightStore::open(&[path]).unwrap();
        let device = Default::default();
        assert!(store.embedding::<TestBackend>("emb", 5, 2, &device).is_err());
        assert!(store.embedding::<TestBackend>("emb", 4, 2, &device).is_ok());
        assert!(store.tensor::<TestBackend, 1>("missing", [1], &device).is_err());
    }

    #[test]
    fn test_layer_norm_accepts_gamma_beta_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        write_safetensors(
            &path,
            &[
                ("ln.gamma".into(), vec![2], vec![2.0, 2.0]),
                ("ln.beta".into(), vec![2], vec![1.0, 1.0]),
            ],
        );
        let store = WeightStore::open(&[path]).unwrap();
        let device = Default::default();
        let norm = store.layer_norm::<TestBackend>("ln", 2, 1e-12, &device).unwrap();
        let gamma: Vec<f32> = norm.gamma.val().into_data().to_vec().unwrap();
        assert_eq!(gamma, vec![2.0, 2.0]);
    }
}
