use crate::backends::Token;

/// Outcome of consuming the whole prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefillResult {
    /// First generated token, sampled from the last prompt position.
    pub token: Token,
    pub forwardpass_durations: Vec<f64>,
    /// Wall-clock time from the first forward pass to the sampled token.
    pub duration: f64,
}

/// Outcome of one decode step.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateResult {
    pub token: Token,
    pub forwardpass_duration: f64,
    pub duration: f64,
}
