use super::{FinishReason, Output, PromptBuilder, RunnerError};
use crate::{
    backends::{ModelBackend, cpu::CpuBackend},
    config::{ModelConfig, ResolvableValue, RunConfig},
    generator::{Dequantizer, Generator, LogitsProcessor},
    stats::{PerformanceRecorder, PerformanceSummary, RunRecord},
    tokenizer::{HuggingFaceCodec, TokenCodec},
};

#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub iteration: usize,
    pub prompt_index: usize,
    pub output: Output,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptFailure {
    pub iteration: usize,
    pub prompt_index: usize,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Finished runs in execution order.
    pub entries: Vec<BatchEntry>,
    pub failures: Vec<PromptFailure>,
    pub summary: Option<PerformanceSummary>,
    /// Set when the callback stopped the batch early.
    pub cancelled: bool,
}

impl BatchReport {
    /// Text of every finished run, concatenated in emission order.
    pub fn text(&self) -> String {
        self.entries.iter().map(|entry| entry.output.text.as_str()).collect()
    }
}

/// Runs prompts against one model, one fresh session per prompt.
pub struct Runner {
    config: RunConfig,
    generator: Generator,
    codec: Box<dyn TokenCodec>,
    prompt_builder: PromptBuilder,
    recorder: PerformanceRecorder,
}

impl Runner {
    /// Loads the model artifacts and tokenizer named in `config`.
    pub fn new(config: RunConfig) -> Result<Self, RunnerError> {
        config.validate()?;
        config.validate_paths()?;
        let backend = CpuBackend::open(&config.model_paths)?;
        let codec = HuggingFaceCodec::from_file(
            &config.tokenizer_path,
            &config.eos_tokens,
        )?;
        Self::with_components(config, Box::new(backend), Box::new(codec))
    }

    pub fn with_components(
        config: RunConfig,
        backend: Box<dyn ModelBackend>,
        codec: Box<dyn TokenCodec>,
    ) -> Result<Self, RunnerError> {
        config.validate()?;
        let prompt_builder =
            PromptBuilder::new(config.prompt_template.clone())?;

        let dequantizer = resolve_dequantizer(&config, backend.model_config());
        let logits_processor = LogitsProcessor::new(
            dequantizer,
            config.temperature,
            config.sampling_seed.resolve(),
        );
        let generator = Generator::new(
            backend,
            logits_processor,
            config.eval_mode,
            config.prefill_step_size,
        );
        log::info!(
            "Runner ready: eval mode {}, kv updater {}, prefill step size {}, temperature {}",
            generator.eval_mode(),
            config.kv_updater,
            generator.prefill_step_size(),
            config.temperature
        );

        let recorder =
            PerformanceRecorder::new(config.performance_output_path.as_deref());
        Ok(Self {
            config,
            generator,
            codec,
            prompt_builder,
            recorder,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn model_config(&self) -> &ModelConfig {
        self.generator.model_config()
    }

    pub fn codec(&self) -> &dyn TokenCodec {
        self.codec.as_ref()
    }

    pub fn recorder(&self) -> &PerformanceRecorder {
        &self.recorder
    }

    /// Generates a continuation of a single prompt.
    pub fn generate<F>(
        &mut self,
        seq_len: usize,
        prompt: &str,
        system_prompt: Option<&str>,
        callback: F,
    ) -> Result<Output, RunnerError>
    where
        F: FnMut(&str) -> bool,
    {
        let prompt_tokens = self.prompt_builder.build(
            self.codec.as_ref(),
            prompt,
            system_prompt,
        )?;
        let mut session = self.generator.new_session(
            prompt_tokens,
            seq_len,
            self.config.kv_updater,
            self.config.shift_pointer_window,
        )?;
        let output =
            self.generator.run(&mut session, self.codec.as_ref(), callback)?;
        Ok(output)
    }

    pub fn run_batch<F>(
        &mut self,
        prompts: &[String],
        seq_len: usize,
        system_prompt: Option<&str>,
        callback: F,
    ) -> Result<BatchReport, RunnerError>
    where
        F: FnMut(&str) -> bool,
    {
        self.run_batch_with_progress(
            prompts,
            seq_len,
            system_prompt,
            callback,
            |_| {},
        )
    }

    /// Runs every prompt `num_iters` times, iteration by iteration.
    ///
    /// A prompt that fails is logged and reported, and the batch moves on;
    /// only fatal errors end it early. `progress` sees each finished run.
    /// The performance summary is appended to the log when the batch ends.
    pub fn run_batch_with_progress<F, P>(
        &mut self,
        prompts: &[String],
        seq_len: usize,
        system_prompt: Option<&str>,
        mut callback: F,
        mut progress: P,
    ) -> Result<BatchReport, RunnerError>
    where
        F: FnMut(&str) -> bool,
        P: FnMut(&RunRecord),
    {
        let mut report = BatchReport::default();
        'batch: for iteration in 0..self.config.num_iters {
            for (prompt_index, prompt) in prompts.iter().enumerate() {
                log::debug!("Iteration {iteration}, prompt {prompt_index}");
                let result =
                    self.generate(seq_len, prompt, system_prompt, &mut callback);
                match result {
                    Ok(output) => {
                        let record =
                            RunRecord::new(iteration, prompt_index, &output);
                        progress(&record);
                        self.recorder.record(record);

                        let cancelled =
                            output.finish_reason == FinishReason::Cancelled;
                        report.entries.push(BatchEntry {
                            iteration,
                            prompt_index,
                            output,
                        });
                        if cancelled {
                            log::info!("Batch cancelled by callback");
                            report.cancelled = true;
                            break 'batch;
                        }
                    },
                    Err(error) if error.is_fatal() => {
                        log::error!(
                            "Iteration {iteration}, prompt {prompt_index}: {error}"
                        );
                        self.recorder.finish();
                        return Err(error);
                    },
                    Err(error) => {
                        log::error!(
                            "Iteration {iteration}, prompt {prompt_index}: {error}"
                        );
                        report.failures.push(PromptFailure {
                            iteration,
                            prompt_index,
                            error: error.to_string(),
                        });
                    },
                }
            }
        }

        report.summary = self.recorder.finish();
        Ok(report)
    }
}

/// Explicit scale wins; otherwise fall back to what the model declares.
fn resolve_dequantizer(
    config: &RunConfig,
    model_config: &ModelConfig,
) -> Dequantizer {
    if config.logits_scale != 0.0 {
        return Dequantizer::new(config.logits_scale, config.logits_offset);
    }
    match &model_config.logits_quantization {
        Some(quantization) => {
            log::info!(
                "Using logits quantization declared by the model: scale {}, offset {}",
                quantization.scale,
                quantization.offset
            );
            Dequantizer::new(quantization.scale, quantization.offset)
        },
        None => Dequantizer::identity(),
    }
}
