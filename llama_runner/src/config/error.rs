use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No model artifacts were configured")]
    MissingModelPath,
    #[error("Model artifact not found at {0:?}")]
    ModelPathNotFound(PathBuf),
    #[error("Tokenizer not found at {0:?}")]
    TokenizerPathNotFound(PathBuf),
    #[error("Temperature must be a finite value >= 0, got {0}")]
    InvalidTemperature(f32),
    #[error("Logits scale must be finite, got {0}")]
    InvalidLogitsScale(f32),
    #[error("Number of iterations must be at least 1")]
    InvalidIterationCount,
    #[error("Prefill step size must be at least 1")]
    InvalidPrefillStepSize,
    #[error("Shift pointer window must be at least 1")]
    InvalidShiftPointerWindow,
    #[error("Unknown evaluation mode \"{0}\"")]
    UnknownEvalMode(String),
    #[error("Unknown kv cache updater \"{0}\"")]
    UnknownKVUpdater(String),
    #[error("Model config is missing from the artifact metadata")]
    MissingModelConfig,
    #[error("Invalid model config: {0}")]
    InvalidModelConfig(String),
    #[error("Unable to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to parse config: {0}")]
    Json(#[from] serde_json::Error),
}
