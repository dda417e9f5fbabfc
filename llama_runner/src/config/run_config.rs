use std::{
    fmt,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use super::{ConfigError, PrefillStepSize, SamplingSeed};
use crate::kv_cache::KVUpdater;

/// Which graphs consume the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalMode {
    /// Every prompt token goes through the single-token decode graph.
    TokenGenerator,
    /// The prompt goes through the batched prefill graph, then decode.
    Hybrid,
}

impl Default for EvalMode {
    fn default() -> Self {
        EvalMode::Hybrid
    }
}

impl TryFrom<i32> for EvalMode {
    type Error = ConfigError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EvalMode::TokenGenerator),
            1 => Ok(EvalMode::Hybrid),
            _ => Err(ConfigError::UnknownEvalMode(value.to_string())),
        }
    }
}

impl FromStr for EvalMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "0" | "kv" | "token_generator" => Ok(EvalMode::TokenGenerator),
            "1" | "hybrid" => Ok(EvalMode::Hybrid),
            _ => Err(ConfigError::UnknownEvalMode(value.to_string())),
        }
    }
}

impl fmt::Display for EvalMode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            EvalMode::TokenGenerator => write!(f, "token_generator"),
            EvalMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Everything the runner needs, fixed for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub model_paths: Vec<PathBuf>,
    pub tokenizer_path: PathBuf,
    pub performance_output_path: Option<PathBuf>,
    /// Zero disables dequantization.
    pub logits_scale: f32,
    pub logits_offset: i32,
    pub temperature: f32,
    pub eval_mode: EvalMode,
    pub kv_updater: KVUpdater,
    pub num_iters: usize,
    pub sampling_seed: SamplingSeed,
    pub prefill_step_size: PrefillStepSize,
    pub shift_pointer_window: Option<usize>,
    pub prompt_template: Option<String>,
    pub eos_tokens: Vec<String>,
}

impl RunConfig {
    pub fn new(
        model_paths: Vec<PathBuf>,
        tokenizer_path: PathBuf,
    ) -> Self {
        Self {
            model_paths,
            tokenizer_path,
            ..Self::default()
        }
    }

    pub fn from_json_file<P: AsRef<Path>>(
        path: P
    ) -> Result<Self, ConfigError> {
        let reader = BufReader::new(File::open(path)?);
        let config: RunConfig = serde_json::from_reader(reader)?;
        Ok(config)
    }

    pub fn performance_output_path(
        mut self,
        performance_output_path: Option<PathBuf>,
    ) -> Self {
        self.performance_output_path = performance_output_path;
        self
    }

    pub fn logits_scale(
        mut self,
        logits_scale: f32,
    ) -> Self {
        self.logits_scale = logits_scale;
        self
    }

    pub fn logits_offset(
        mut self,
        logits_offset: i32,
    ) -> Self {
        self.logits_offset = logits_offset;
        self
    }

    pub fn temperature(
        mut self,
        temperature: f32,
    ) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn eval_mode(
        mut self,
        eval_mode: EvalMode,
    ) -> Self {
        self.eval_mode = eval_mode;
        self
    }

    pub fn kv_updater(
        mut self,
        kv_updater: KVUpdater,
    ) -> Self {
        self.kv_updater = kv_updater;
        self
    }

    pub fn num_iters(
        mut self,
        num_iters: usize,
    ) -> Self {
        self.num_iters = num_iters;
        self
    }

    pub fn sampling_seed(
        mut self,
        sampling_seed: SamplingSeed,
    ) -> Self {
        self.sampling_seed = sampling_seed;
        self
    }

    pub fn prefill_step_size(
        mut self,
        prefill_step_size: PrefillStepSize,
    ) -> Self {
        self.prefill_step_size = prefill_step_size;
        self
    }

    pub fn shift_pointer_window(
        mut self,
        shift_pointer_window: Option<usize>,
    ) -> Self {
        self.shift_pointer_window = shift_pointer_window;
        self
    }

    pub fn prompt_template(
        mut self,
        prompt_template: Option<String>,
    ) -> Self {
        self.prompt_template = prompt_template;
        self
    }

    pub fn eos_tokens(
        mut self,
        eos_tokens: Vec<String>,
    ) -> Self {
        self.eos_tokens = eos_tokens;
        self
    }

    /// Checks the values that do not depend on the filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }
        if !self.logits_scale.is_finite() {
            return Err(ConfigError::InvalidLogitsScale(self.logits_scale));
        }
        if self.num_iters == 0 {
            return Err(ConfigError::InvalidIterationCount);
        }
        if self.prefill_step_size == PrefillStepSize::Custom(0) {
            return Err(ConfigError::InvalidPrefillStepSize);
        }
        if self.shift_pointer_window == Some(0) {
            return Err(ConfigError::InvalidShiftPointerWindow);
        }
        Ok(())
    }

    pub fn validate_paths(&self) -> Result<(), ConfigError> {
        if self.model_paths.is_empty() {
            return Err(ConfigError::MissingModelPath);
        }
        if let Some(path) = self.model_paths.iter().find(|path| !path.is_file())
        {
            return Err(ConfigError::ModelPathNotFound(path.clone()));
        }
        if !self.tokenizer_path.is_file() {
            return Err(ConfigError::TokenizerPathNotFound(
                self.tokenizer_path.clone(),
            ));
        }
        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model_paths: Vec::new(),
            tokenizer_path: PathBuf::from("tokenizer.json"),
            performance_output_path: None,
            logits_scale: 0.0,
            logits_offset: 0,
            temperature: 0.0,
            eval_mode: EvalMode::default(),
            kv_updater: KVUpdater::default(),
            num_iters: 1,
            sampling_seed: SamplingSeed::default(),
            prefill_step_size: PrefillStepSize::default(),
            shift_pointer_window: None,
            prompt_template: None,
            eos_tokens: Vec::new(),
        }
    }
}
