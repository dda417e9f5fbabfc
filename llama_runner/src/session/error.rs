use thiserror::Error;

use crate::{
    backends::cpu::WeightsError, config::ConfigError,
    generator::GeneratorError, tokenizer::CodecError,
};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Unable to load model: {0}")]
    Loading(#[from] WeightsError),
    #[error("Tokenizer error: {0}")]
    Codec(#[from] CodecError),
    #[error("Unable to render prompt template: {0}")]
    Template(#[from] minijinja::Error),
    #[error("Generation failed: {0}")]
    Generator(#[from] GeneratorError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Whether a batch has to stop instead of moving on to the next prompt.
    pub fn is_fatal(&self) -> bool {
        match self {
            RunnerError::Config(_)
            | RunnerError::Loading(_)
            | RunnerError::Io(_) => true,
            RunnerError::Generator(error) => error.is_fatal(),
            RunnerError::Codec(_) | RunnerError::Template(_) => false,
        }
    }
}
