use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::DataType;

/// Metadata key under which the first artifact shard stores its
/// [`ModelConfig`] as JSON.
pub const MODEL_CONFIG_METADATA_KEY: &str = "model_config";

fn default_norm_eps() -> f32 {
    1e-5
}

/// How the backend quantizes the logits it returns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogitsQuantization {
    pub data_type: DataType,
    pub scale: f32,
    pub offset: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub hidden_dim: usize,
    pub head_dim: usize,
    pub num_layers: usize,
    pub context_length: usize,
    /// Width of the batched prefill graph.
    pub prefill_step_size: usize,
    #[serde(default = "default_norm_eps")]
    pub norm_eps: f32,
    #[serde(default)]
    pub logits_quantization: Option<LogitsQuantization>,
}

impl ModelConfig {
    pub fn new(
        vocab_size: usize,
        hidden_dim: usize,
        head_dim: usize,
        num_layers: usize,
        context_length: usize,
        prefill_step_size: usize,
    ) -> Self {
        Self {
            vocab_size,
            hidden_dim,
            head_dim,
            num_layers,
            context_length,
            prefill_step_size,
            norm_eps: default_norm_eps(),
            logits_quantization: None,
        }
    }

    pub fn logits_quantization(
        mut self,
        logits_quantization: Option<LogitsQuantization>,
    ) -> Self {
        self.logits_quantization = logits_quantization;
        self
    }

    pub fn from_metadata(
        metadata: &HashMap<String, String>
    ) -> Result<Self, ConfigError> {
        let json = metadata
            .get(MODEL_CONFIG_METADATA_KEY)
            .ok_or(ConfigError::MissingModelConfig)?;
        let config: ModelConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_metadata(
        &self
    ) -> Result<HashMap<String, String>, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(HashMap::from([(MODEL_CONFIG_METADATA_KEY.to_string(), json)]))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let dimensions = [
            ("vocab_size", self.vocab_size),
            ("hidden_dim", self.hidden_dim),
            ("head_dim", self.head_dim),
            ("num_layers", self.num_layers),
            ("context_length", self.context_length),
            ("prefill_step_size", self.prefill_step_size),
        ];
        if let Some((name, _)) =
            dimensions.iter().find(|(_, value)| *value == 0)
        {
            return Err(ConfigError::InvalidModelConfig(format!(
                "{name} must be positive"
            )));
        }
        if let Some(quantization) = &self.logits_quantization {
            if quantization.data_type.is_floating_point() {
                return Err(ConfigError::InvalidModelConfig(
                    "logits quantization requires an integer data type"
                        .to_string(),
                ));
            }
            if !quantization.scale.is_finite() || quantization.scale == 0.0 {
                return Err(ConfigError::InvalidModelConfig(
                    "logits quantization scale must be finite and non-zero"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }
}
