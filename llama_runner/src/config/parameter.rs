use rand::prelude::*;
use serde::{Deserialize, Serialize};

use super::ModelConfig;

pub trait ResolvableValue<Value> {
    fn resolve(&self) -> Value;
}

pub trait ConfigResolvableValue<Config, Value> {
    fn resolve(
        &self,
        config: &Config,
    ) -> Value;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingSeed {
    Default,
    Custom(u64),
}

impl Default for SamplingSeed {
    fn default() -> Self {
        SamplingSeed::Default
    }
}

impl ResolvableValue<u64> for SamplingSeed {
    fn resolve(&self) -> u64 {
        match self {
            SamplingSeed::Default => rand::rng().random::<u64>(),
            SamplingSeed::Custom(seed) => *seed,
        }
    }
}

/// Number of prompt tokens fed to the batched prefill graph per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefillStepSize {
    Default,
    Custom(usize),
}

impl Default for PrefillStepSize {
    fn default() -> Self {
        PrefillStepSize::Default
    }
}

impl ConfigResolvableValue<ModelConfig, usize> for PrefillStepSize {
    fn resolve(
        &self,
        config: &ModelConfig,
    ) -> usize {
        let maximal_value = config.prefill_step_size.max(1);
        let proposed_value = match self {
            PrefillStepSize::Default => maximal_value,
            PrefillStepSize::Custom(value) => *value,
        };
        proposed_value.clamp(1, maximal_value)
    }
}
