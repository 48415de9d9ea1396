// ============================================================
// Typed configuration and metric errors
// ============================================================
// Everything else in the crate propagates `anyhow::Error`;
// these are the failures a caller may want to match on.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("num_beams must be at least 1")]
    ZeroBeams,

    #[error("num_return_sequences must be at least 1")]
    ZeroReturnSequences,

    #[error("max_new_tokens must be at least 1")]
    ZeroMaxNewTokens,

    #[error("greedy decoding returns a single sequence, got num_return_sequences={0}")]
    GreedyMultipleSequences(usize),

    #[error("num_return_sequences ({requested}) cannot exceed num_beams ({num_beams})")]
    TooManyReturnSequences { requested: usize, num_beams: usize },

    #[error("top_p must be in (0, 1], got {0}")]
    InvalidTopP(f32),

    #[error("temperature must be strictly positive when sampling, got {0}")]
    InvalidTemperature(f32),

    #[error("unknown interval strategy '{0}' (expected no, steps or epoch)")]
    UnknownStrategy(String),

    #[error("strategy 'steps' needs a positive step interval")]
    ZeroStepInterval,

    #[error("unknown padding '{0}' (expected max_length, longest or do_not_pad)")]
    UnknownPadding(String),

    #[error("unknown device '{0}' (expected auto, cpu or gpu:<index>)")]
    InvalidDevice(String),
}

/// Bad input to an evaluation metric.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricError {
    #[error("predictions ({predictions}) and references ({references}) differ in length")]
    LengthMismatch { predictions: usize, references: usize },

    #[error("cannot compute a metric over zero examples")]
    EmptyInput,
}
