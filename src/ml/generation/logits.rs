// ============================================================
// Next-token score processing
// ============================================================
// Host-side operations on one row of vocabulary scores. Warpers
// run only when sampling, in this order:
//
//   temperature → top-k → top-p
//
// Filtered tokens get -inf so they vanish after softmax.

use rand::{distributions::WeightedIndex, prelude::Distribution, Rng};

use super::config::GenerationConfig;

pub fn log_softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let log_sum = scores.iter().map(|s| (s - max).exp()).sum::<f32>().ln() + max;
    scores.iter().map(|s| s - log_sum).collect()
}

pub fn softmax(scores: &[f32]) -> Vec<f32> {
    log_softmax(scores).into_iter().map(f32::exp).collect()
}

pub fn argmax(scores: &[f32]) -> usize {
    crate::ml::metrics::argmax(scores)
}

pub fn apply_temperature(scores: &mut [f32], temperature: f32) {
    if temperature != 1.0 {
        scores.iter_mut().for_each(|s| *s /= temperature);
    }
}

/// Keep the `top_k` best scores (ties with the k-th are kept too).
pub fn top_k_filter(scores: &mut [f32], top_k: usize, min_keep: usize) {
    if top_k == 0 {
        return;
    }
    let k = top_k.max(min_keep).min(scores.len());
    let mut sorted = scores.to_vec();
    sorted.sort_unstable_by(|a, b| b.total_cmp(a));
    let threshold = sorted[k - 1];
    scores
        .iter_mut()
        .filter(|s| **s < threshold)
        .for_each(|s| *s = f32::NEG_INFINITY);
}

/// Nucleus filtering: walking from the most likely token down, a token
/// is kept while the probability mass before it is still below `top_p`.
/// At least `min_keep` tokens survive.
pub fn top_p_filter(scores: &mut [f32], top_p: f32, min_keep: usize) {
    if top_p >= 1.0 {
        return;
    }
    let probs = softmax(scores);
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_unstable_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut mass_before = 0.0f32;
    for (rank, &idx) in order.iter().enumerate() {
        if rank >= min_keep && mass_before >= top_p {
            scores[idx] = f32::NEG_INFINITY;
        }
        mass_before += probs[idx];
    }
}

/// Apply every sampling warper configured in `config`.
pub fn warp(scores: &mut [f32], config: &GenerationConfig) {
    let min_keep = if config.num_beams > 1 { 2 } else { 1 };
    apply_temperature(scores, config.temperature);
    top_k_filter(scores, config.top_k, min_keep);
    top_p_filter(scores, config.top_p, min_keep);
}

/// Draw one index from the softmax of `scores`.
pub fn sample<R: Rng>(scores: &[f32], rng: &mut R) -> usize {
    let probs = softmax(scores);
    match WeightedIndex::new(&probs) {
        Ok(dist) => dist.sample(rng),
        // every weight underflowed: fall back to the best score
        Err(_) => argmax(scores),
    }
}

/// Draw `amount` distinct indices from the softmax of `scores`.
/// Never returns a filtered (-inf) index.
pub fn sample_distinct<R: Rng>(scores: &[f32], amount: usize, rng: &mut R) -> Vec<usize> {
    let probs = softmax(scores);
    let candidates: Vec<usize> = (0..scores.len()).filter(|&i| scores[i].is_finite()).collect();
    let amount = amount.min(candidates.len());
    match rand::seq::index::sample_weighted(rng, candidates.len(), |i| probs[candidates[i]], amount) {
        Ok(picked) => picked.into_iter().map(|i| candidates[i]).collect(),
        Err(_) => {
            let mut best = candidates;
            best.sort_unstable_by(|&a, &b| scores[b].total_cmp(&scores[a]));
            best.truncate(amount);
            best
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn kept(scores: &[f32]) -> Vec<usize> {
        (0..scores.len()).filter(|&i| scores[i].is_finite()).collect()
    }

    #[test]
    fn test_log_softmax_normalises() {
        let lp = log_softmax(&[1.0, 2.0, 3.0]);
        let total: f32 = lp.iter().map(|v| v.exp()).sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-6);
        assert!(lp[2] > lp[1] && lp[1] > lp[0]);
    }

    #[test]
    fn test_top_k_keeps_best() {
        let mut scores = vec![0.1, 3.0, 2.0, -1.0];
        top_k_filter(&mut scores, 2, 1);
        assert_eq!(kept(&scores), vec![1, 2]);
    }

    #[test]
    fn test_top_k_respects_min_keep() {
        let mut scores = vec![0.1, 3.0, 2.0, -1.0];
        top_k_filter(&mut scores, 1, 2);
        assert_eq!(kept(&scores).len(), 2);
    }

    #[test]
    fn test_top_p_keeps_nucleus() {
        // probabilities 0.5, 0.3, 0.2
        let mut scores: Vec<f32> = [0.5f32, 0.3, 0.2].iter().map(|p| p.ln()).collect();
        top_p_filter(&mut scores, 0.75, 1);
        assert_eq!(kept(&scores), vec![0, 1]);

        let mut scores: Vec<f32> = [0.9f32, 0.05, 0.05].iter().map(|p| p.ln()).collect();
        top_p_filter(&mut scores, 0.5, 2);
        assert_eq!(kept(&scores).len(), 2);
    }

    #[test]
    fn test_temperature_sharpens() {
        let mut scores = vec![1.0, 2.0];
        apply_temperature(&mut scores, 0.5);
        assert_eq!(scores, vec![2.0, 4.0]);
    }

    #[test]
    fn test_sampling_never_picks_filtered() {
        let mut rng = StdRng::seed_from_u64(3);
        let scores = vec![f32::NEG_INFINITY, 0.0, f32::NEG_INFINITY, 0.0];
        for _ in 0..50 {
            let i = sample(&scores, &mut rng);
            assert!(i == 1 || i == 3);
        }
        let mut picked = sample_distinct(&scores, 5, &mut rng);
        picked.sort_unstable();
        assert_eq!(picked, vec![1, 3]);
    }
}
