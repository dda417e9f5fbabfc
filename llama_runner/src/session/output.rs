use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{backends::Token, stats::Stats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    /// An end-of-sequence token was generated.
    Stop,
    /// The sequence budget was used up.
    Length,
    /// The callback asked to stop.
    Cancelled,
}

impl fmt::Display for FinishReason {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            FinishReason::Stop => write!(f, "stop"),
            FinishReason::Length => write!(f, "length"),
            FinishReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Output {
    /// Concatenation of every fragment handed to the callback.
    pub text: String,
    pub prompt_tokens: Vec<Token>,
    pub generated_tokens: Vec<Token>,
    pub stats: Stats,
    pub finish_reason: FinishReason,
}

impl Output {
    pub fn total_tokens(&self) -> usize {
        self.prompt_tokens.len() + self.generated_tokens.len()
    }
}
