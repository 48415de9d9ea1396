// ============================================================
// Beam hypotheses
// ============================================================
// Finished beam-search candidates. Each is scored by
//
//   sum_logprobs / generated_len ^ length_penalty
//
// and only the `num_beams` best are retained.

#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub score: f32,
    /// Generated tokens, without the prompt
    pub tokens: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct BeamHypotheses {
    num_beams: usize,
    length_penalty: f32,
    early_stopping: bool,
    hyps: Vec<Hypothesis>,
}

impl BeamHypotheses {
    pub fn new(num_beams: usize, length_penalty: f32, early_stopping: bool) -> Self {
        Self { num_beams, length_penalty, early_stopping, hyps: Vec::with_capacity(num_beams + 1) }
    }

    fn normalised(&self, sum_logprobs: f32, generated_len: usize) -> f32 {
        sum_logprobs / (generated_len.max(1) as f32).powf(self.length_penalty)
    }

    fn worst_score(&self) -> f32 {
        self.hyps.iter().map(|h| h.score).fold(f32::INFINITY, f32::min)
    }

    /// Offer a finished sequence; it replaces the worst one when full.
    pub fn add(&mut self, tokens: Vec<u32>, sum_logprobs: f32, generated_len: usize) {
        let score = self.normalised(sum_logprobs, generated_len);
        if self.hyps.len() < self.num_beams || score > self.worst_score() {
            self.hyps.push(Hypothesis { score, tokens });
            if self.hyps.len() > self.num_beams {
                let worst = self
                    .hyps
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1.score.total_cmp(&b.1.score))
                    .map(|(i, _)| i);
                if let Some(worst) = worst {
                    self.hyps.remove(worst);
                }
            }
        }
    }

    /// Whether no running beam can still beat the retained hypotheses.
    /// `best_sum_logprobs` is the best running beam score at `generated_len`.
    pub fn is_done(&self, best_sum_logprobs: f32, generated_len: usize) -> bool {
        if self.hyps.len() < self.num_beams {
            return false;
        }
        if self.early_stopping {
            return true;
        }
        self.worst_score() >= self.normalised(best_sum_logprobs, generated_len)
    }

    /// Hypotheses, best first.
    pub fn into_sorted(mut self) -> Vec<Hypothesis> {
        self.hyps.sort_by(|a, b| b.score.total_cmp(&a.score));
        self.hyps
    }
}
