mod error;
mod output;
mod prompt;
mod runner;

pub use error::RunnerError;
pub use output::{FinishReason, Output};
pub use prompt::PromptBuilder;
pub use runner::{BatchEntry, BatchReport, PromptFailure, Runner};
