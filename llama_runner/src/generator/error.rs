use thiserror::Error;

use super::{GenerationPhase, SamplingError};
use crate::{backends::BackendError, tokenizer::CodecError};

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Backend failed: {0}")]
    Backend(#[from] BackendError),
    #[error("Sampling failed: {0}")]
    Sampling(#[from] SamplingError),
    #[error(
        "Context length exceeded: {tokens} tokens leave no room within a budget of {seq_len}"
    )]
    ContextLengthExceeded {
        tokens: usize,
        seq_len: usize,
    },
    #[error("Prompt is empty")]
    EmptyPrompt,
    #[error("Session was poisoned by an earlier failure")]
    SessionPoisoned,
    #[error("Step is not valid in phase {0:?}")]
    UnexpectedPhase(GenerationPhase),
    #[error("Codec failed: {0}")]
    Codec(#[from] CodecError),
}

impl GeneratorError {
    pub fn is_fatal(&self) -> bool {
        match self {
            GeneratorError::Backend(error) => error.is_fatal(),
            _ => false,
        }
    }
}
