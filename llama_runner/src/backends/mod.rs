pub mod cpu;

use thiserror::Error;

use crate::{
    LogitsBuffer,
    config::ModelConfig,
    kv_cache::{CacheError, KVCacheUpdater},
};

/// Vocabulary index.
pub type Token = u64;

/// Execution graph a forward pass runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardGraph {
    /// Batched graph consuming up to `prefill_step_size` positions.
    Prefill,
    /// Single-position graph.
    Decode,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Shape mismatch for {name}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("KV cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Backend is unusable: {0}")]
    Unrecoverable(String),
}

impl BackendError {
    /// Whether every later forward pass is expected to fail as well.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BackendError::Unrecoverable(_))
    }
}

/// Forward-pass contract between the generator and an inference backend.
///
/// A call consumes positions `start_position..start_position + n`, writes
/// their keys and values into `kv_cache` and returns the logits predicting
/// the position right after the last one.
pub trait ModelBackend {
    fn model_config(&self) -> &ModelConfig;

    fn forward(
        &mut self,
        graph: ForwardGraph,
        token_ids: &[Token],
        start_position: usize,
        kv_cache: &mut dyn KVCacheUpdater,
    ) -> Result<LogitsBuffer, BackendError>;
}
