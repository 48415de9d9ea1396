// ============================================================
// Layer 5 — Autoregressive Generation
// ============================================================
// Decoding loop over any causal LM that supports a key/value
// cache. The prompt is prefilled once for a single row and the
// cache is then expanded to however many rows the mode needs:
//
//   Greedy      1 row          argmax per step
//   Sample      nrs rows       warp, then draw a token per row
//   BeamSearch  num_beams      top 2·num_beams over all beams
//   BeamSample  num_beams      draw 2·num_beams over all beams
//
// Beam modes score candidates with log-softmax plus the running
// beam score; EOS candidates become finished hypotheses.
// Everything past the forward pass runs on the host in f32.
//
// Reference: Holtzman et al. (2020) nucleus sampling

pub mod beam;
pub mod config;
pub mod logits;

use anyhow::{ensure, Result};
use burn::prelude::*;
use rand::{rngs::StdRng, SeedableRng};

use crate::ml::llama::{KvCache, LlamaForCausalLM};
use beam::BeamHypotheses;
use config::{DecodingMode, GenerationConfig};

/// Large negative start score so only the first beam expands on step one.
const INACTIVE_BEAM: f32 = -1.0e9;

/// A language model that can be decoded incrementally.
pub trait CausalLm<B: Backend> {
    fn new_cache(&self) -> KvCache<B>;

    /// Logits [batch, seq, vocab] for `input_ids` following the cached positions.
    fn forward_cached(&self, input_ids: Tensor<B, 2, Int>, cache: &mut KvCache<B>) -> Tensor<B, 3>;
}

impl<B: Backend> CausalLm<B> for LlamaForCausalLM<B> {
    fn new_cache(&self) -> KvCache<B> {
        LlamaForCausalLM::new_cache(self)
    }

    fn forward_cached(&self, input_ids: Tensor<B, 2, Int>, cache: &mut KvCache<B>) -> Tensor<B, 3> {
        self.forward(input_ids, cache)
    }
}

/// Generate `num_return_sequences` continuations of `prompt`.
/// Returned token lists exclude the prompt.
pub fn generate<B: Backend, M: CausalLm<B>>(
    model: &M,
    prompt: &[u32],
    config: &GenerationConfig,
    device: &B::Device,
) -> Result<Vec<Vec<u32>>> {
    let mode = config.validate()?;
    ensure!(!prompt.is_empty(), "Cannot generate from an empty prompt");
    tracing::debug!("Decoding mode {:?} for a {}-token prompt", mode, prompt.len());

    let mut decoder = Decoder {
        model,
        config,
        device,
        cache: model.new_cache(),
        rng: StdRng::seed_from_u64(config.seed),
    };
    match mode {
        DecodingMode::Greedy | DecodingMode::Sample => decoder.sample_rows(prompt, mode == DecodingMode::Sample),
        DecodingMode::BeamSearch | DecodingMode::BeamSample => {
            decoder.beam_search(prompt, mode == DecodingMode::BeamSample)
        }
    }
}

struct Decoder<'a, B: Backend, M> {
    model: &'a M,
    config: &'a GenerationConfig,
    device: &'a B::Device,
    cache: KvCache<B>,
    rng: StdRng,
}

impl<B: Backend, M: CausalLm<B>> Decoder<'_, B, M> {
    /// Feed `tokens` (row-major, `rows` rows) and return the last-position
    /// logits of every row.
    fn step(&mut self, tokens: &[u32], rows: usize) -> Result<Vec<Vec<f32>>> {
        let seq = tokens.len() / rows;
        let ids: Vec<i64> = tokens.iter().map(|&t| i64::from(t)).collect();
        let input = Tensor::<B, 2, Int>::from_data(TensorData::new(ids, [rows, seq]), self.device);

        let output = self.model.forward_cached(input, &mut self.cache);
        let [_, _, vocab] = output.dims();
        let last = output.slice([0..rows, seq - 1..seq, 0..vocab]);
        let values: Vec<f32> = last.into_data().iter::<f32>().collect();
        Ok(values.chunks(vocab).map(<[f32]>::to_vec).collect())
    }

    /// Prefill the prompt once, then copy it into `rows` rows.
    fn prefill(&mut self, prompt: &[u32], rows: usize) -> Result<Vec<Vec<f32>>> {
        let first = self.step(prompt, 1)?.into_iter().next().unwrap_or_default();
        self.cache.reorder(&vec![0; rows]);
        Ok(vec![first; rows])
    }

    fn sample_rows(&mut self, prompt: &[u32], sampling: bool) -> Result<Vec<Vec<u32>>> {
        let rows = if sampling { self.config.num_return_sequences } else { 1 };
        let pad = self.config.pad_token();
        let mut next_logits = self.prefill(prompt, rows)?;
        let mut sequences = vec![Vec::new(); rows];
        let mut finished = vec![false; rows];

        for step in 0..self.config.max_new_tokens {
            let mut next = Vec::with_capacity(rows);
            for (row, scores) in next_logits.iter_mut().enumerate() {
                if finished[row] {
                    next.push(pad);
                    continue;
                }
                let token = if sampling {
                    logits::warp(scores, self.config);
                    logits::sample(scores, &mut self.rng)
                } else {
                    logits::argmax(scores)
                } as u32;
                sequences[row].push(token);
                finished[row] = self.config.is_eos(token);
                next.push(token);
            }

            if finished.iter().all(|&f| f) || step + 1 == self.config.max_new_tokens {
                break;
            }
            next_logits = self.step(&next, rows)?;
        }
        Ok(sequences)
    }

    fn beam_search(&mut self, prompt: &[u32], sampling: bool) -> Result<Vec<Vec<u32>>> {
        let num_beams = self.config.num_beams;
        let mut next_logits = self.prefill(prompt, num_beams)?;
        let mut beams: Vec<Vec<u32>> = vec![Vec::new(); num_beams];
        let mut beam_scores = vec![INACTIVE_BEAM; num_beams];
        beam_scores[0] = 0.0;

        let mut hyps = BeamHypotheses::new(num_beams, self.config.length_penalty, self.config.early_stopping);
        let mut done = false;

        for step in 0..self.config.max_new_tokens {
            let vocab = next_logits.first().map_or(0, Vec::len);
            let scores = candidate_scores(&next_logits, &beam_scores, self.config, sampling);

            let n_candidates = 2 * num_beams;
            let mut picked = if sampling {
                logits::sample_distinct(&scores, n_candidates, &mut self.rng)
            } else {
                let mut order: Vec<usize> = (0..scores.len()).filter(|&i| scores[i].is_finite()).collect();
                order.sort_unstable_by(|&a, &b| scores[b].total_cmp(&scores[a]));
                order.truncate(n_candidates);
                order
            };
            picked.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

            let next = advance_beams(&picked, &scores, &beams, vocab, self.config, &mut hyps);
            ensure!(!next.is_empty(), "Every beam candidate ended at step {}", step + 1);

            // running beams held `step` generated tokens before this step
            done = hyps.is_done(next[0].0, step);
            beams = next
                .iter()
                .map(|&(_, beam, token)| {
                    let mut seq = beams[beam].clone();
                    seq.push(token);
                    seq
                })
                .collect();
            beam_scores = next.iter().map(|&(score, _, _)| score).collect();

            if done || step + 1 == self.config.max_new_tokens {
                break;
            }
            let sources: Vec<usize> = next.iter().map(|&(_, beam, _)| beam).collect();
            let tokens: Vec<u32> = next.iter().map(|&(_, _, token)| token).collect();
            self.cache.reorder(&sources);
            next_logits = self.step(&tokens, tokens.len())?;
        }

        if !done {
            for (seq, score) in beams.into_iter().zip(beam_scores) {
                let len = seq.len();
                hyps.add(seq, score, len);
            }
        }

        let best: Vec<Vec<u32>> = hyps
            .into_sorted()
            .into_iter()
            .take(self.config.num_return_sequences)
            .map(|h| h.tokens)
            .collect();
        ensure!(
            best.len() == self.config.num_return_sequences,
            "Beam search finished with {} hypotheses, {} requested",
            best.len(),
            self.config.num_return_sequences
        );
        Ok(best)
    }
}

/// Flattened `[beam * vocab + token]` scores: log-softmax plus the
/// running beam score. When sampling, the warpers see the accumulated
/// score, so temperature also scales the beam's history.
fn candidate_scores(
    next_logits: &[Vec<f32>],
    beam_scores: &[f32],
    config: &GenerationConfig,
    sampling: bool,
) -> Vec<f32> {
    let vocab = next_logits.first().map_or(0, Vec::len);
    let mut scores = Vec::with_capacity(next_logits.len() * vocab);
    for (row, beam_score) in next_logits.iter().zip(beam_scores) {
        let mut row_scores: Vec<f32> = logits::log_softmax(row).into_iter().map(|s| s + beam_score).collect();
        if sampling {
            logits::warp(&mut row_scores, config);
        }
        scores.extend(row_scores);
    }
    scores
}

/// Walk `picked` best first. EOS candidates ranked among the top
/// `num_beams` become hypotheses scored over the tokens before EOS;
/// the rest continue as `(score, source beam, token)`.
fn advance_beams(
    picked: &[usize],
    scores: &[f32],
    beams: &[Vec<u32>],
    vocab: usize,
    config: &GenerationConfig,
    hyps: &mut BeamHypotheses,
) -> Vec<(f32, usize, u32)> {
    let mut next = Vec::with_capacity(config.num_beams);
    for (rank, &flat) in picked.iter().enumerate() {
        let (beam, token) = (flat / vocab, (flat % vocab) as u32);
        if config.is_eos(token) {
            if rank < config.num_beams {
                hyps.add(beams[beam].clone(), scores[flat], beams[beam].len());
            }
        } else {
            next.push((scores[flat], beam, token));
        }
        if next.len() == config.num_beams {
            break;
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::ml::llama::tests::tiny_config;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn tiny_model() -> LlamaForCausalLM<TestBackend> {
        tiny_config(24).init::<TestBackend>(&Default::default())
    }

    fn run(model: &LlamaForCausalLM<TestBackend>, config: &GenerationConfig) -> Result<Vec<Vec<u32>>> {
        generate(model, &[1, 7, 8, 9], config, &Default::default())
    }

    fn config(num_beams: usize, do_sample: bool, nrs: usize) -> GenerationConfig {
        GenerationConfig {
            max_new_tokens: 6,
            num_beams,
            do_sample,
            num_return_sequences: nrs,
            top_k: 5,
            top_p: 0.9,
            eos_token_ids: vec![2],
            ..Default::default()
        }
    }

    #[test]
    fn test_greedy_is_deterministic() {
        let model = tiny_model();
        let first = run(&model, &config(1, false, 1)).unwrap();
        let second = run(&model, &config(1, false, 1)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        assert!(!first[0].is_empty() && first[0].len() <= 6);
    }

    #[test]
    fn test_beam_search_is_deterministic() {
        let model = tiny_model();
        let first = run(&model, &config(3, false, 2)).unwrap();
        assert_eq!(first, run(&model, &config(3, false, 2)).unwrap());
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_returns_requested_number_of_sequences() {
        let model = tiny_model();
        assert_eq!(run(&model, &config(1, true, 3)).unwrap().len(), 3);
        assert_eq!(run(&model, &config(2, true, 2)).unwrap().len(), 2);
        assert_eq!(run(&model, &config(4, true, 1)).unwrap().len(), 1);
    }

    #[test]
    fn test_seeded_sampling_reproduces() {
        let model = tiny_model();
        let cfg = GenerationConfig { seed: 11, ..config(2, true, 2) };
        assert_eq!(run(&model, &cfg).unwrap(), run(&model, &cfg).unwrap());
    }

    #[test]
    fn test_invalid_config_generates_nothing() {
        let model = tiny_model();
        let err = run(&model, &config(1, false, 2)).unwrap_err();
        assert_eq!(err.downcast_ref::<ConfigError>(), Some(&ConfigError::GreedyMultipleSequences(2)));
        assert!(generate(&model, &[], &config(1, false, 1), &Default::default()).is_err());
    }

    #[test]
    fn test_beam_sample_warps_accumulated_scores() {
        let cfg = GenerationConfig { temperature: 0.5, top_k: 0, top_p: 1.0, ..config(2, true, 1) };
        let scores = candidate_scores(&[vec![0.0, 0.0], vec![1.0, 1.0]], &[-1.0, -3.0], &cfg, true);
        let half = 0.5f32.ln();
        let expected = [(half - 1.0) / 0.5, (half - 1.0) / 0.5, (half - 3.0) / 0.5, (half - 3.0) / 0.5];
        for (got, want) in scores.iter().zip(expected) {
            assert!((got - want).abs() < 1e-5, "{got} != {want}");
        }
        // without sampling the beam score is added unscaled
        let plain = candidate_scores(&[vec![0.0, 0.0]], &[-1.0], &cfg, false);
        assert!((plain[0] - (half - 1.0)).abs() < 1e-5);
    }

    #[test]
    fn test_eos_hypothesis_length_excludes_eos() {
        let cfg = config(2, false, 1);
        let mut hyps = BeamHypotheses::new(2, 1.0, false);
        let beams = vec![vec![5, 6], vec![7, 8]];
        // vocab of 4, EOS is token 2: beam 0 + EOS ranks first
        let scores = vec![-9.0, -9.0, -2.0, -3.0, -9.0, -4.0, -9.0, -9.0];
        let next = advance_beams(&[2, 3, 5], &scores, &beams, 4, &cfg, &mut hyps);
        assert_eq!(next, vec![(-3.0, 0, 3), (-4.0, 1, 1)]);
        let sorted = hyps.into_sorted();
        assert_eq!(sorted.len(), 1);
        assert_eq!(sorted[0].tokens, vec![5, 6]);
        assert_eq!(sorted[0].score, -1.0);
    }

    #[test]
    fn test_sampling_stops_at_eos() {
        let model = tiny_model();
        // every token is EOS, so each row ends after one step
        let cfg = GenerationConfig { eos_token_ids: (0..24).collect(), ..config(1, true, 2) };
        for seq in run(&model, &cfg).unwrap() {
            assert_eq!(seq.len(), 1);
        }
    }
}
