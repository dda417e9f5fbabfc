mod error;
mod model_config;
mod parameter;
mod run_config;

pub use error::ConfigError;
pub use model_config::{
    LogitsQuantization, MODEL_CONFIG_METADATA_KEY, ModelConfig,
};
pub use parameter::{
    ConfigResolvableValue, PrefillStepSize, ResolvableValue, SamplingSeed,
};
pub use run_config::{EvalMode, RunConfig};

pub use crate::kv_cache::KVUpdater;
