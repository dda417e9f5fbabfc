use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use clap::Args;
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use llama_runner::{
    Runner,
    config::{ConfigError, EvalMode, KVUpdater, RunConfig, SamplingSeed},
    session::BatchReport,
    stats::RunRecord,
};

pub const DEFAULT_PROMPT: &str = "The answer to the ultimate question is";
pub const DEFAULT_PERFORMANCE_OUTPUT_PATH: &str = "inference_speed.txt";

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Prompt to complete, may be repeated
    #[arg(long = "prompt")]
    pub prompts: Vec<String>,
    /// Safetensors shard with model weights, may be repeated
    #[arg(long = "model-path")]
    pub model_paths: Vec<PathBuf>,
    /// tokenizer.json of the model
    #[arg(long)]
    pub tokenizer_path: Option<PathBuf>,
    /// File receiving the generated text
    #[arg(long, default_value = "outputs.txt")]
    pub output_path: PathBuf,
    /// Per-run performance log
    #[arg(long)]
    pub performance_output_path: Option<PathBuf>,
    #[arg(long)]
    pub system_prompt: Option<String>,
    /// 0 selects greedy decoding
    #[arg(long)]
    pub temperature: Option<f32>,
    /// Total token budget of one run, prompt included
    #[arg(long, default_value_t = 128)]
    pub seq_len: usize,
    /// 0 feeds the prompt token by token, 1 uses the prefill graph
    #[arg(long)]
    pub eval_mode: Option<EvalMode>,
    /// SmartMask or ShiftPointer
    #[arg(long)]
    pub kv_updater: Option<KVUpdater>,
    #[arg(long, allow_negative_numbers = true)]
    pub logits_scale: Option<f32>,
    #[arg(long, allow_negative_numbers = true)]
    pub logits_offset: Option<i32>,
    /// How many times the whole prompt list is run
    #[arg(long)]
    pub num_iters: Option<usize>,
    /// JSON run config; flags given on the command line take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Sampling seed, random when omitted
    #[arg(long)]
    pub seed: Option<u64>,
}

impl RunArgs {
    pub fn prompts(&self) -> Vec<String> {
        if self.prompts.is_empty() {
            vec![DEFAULT_PROMPT.to_string()]
        } else {
            self.prompts.clone()
        }
    }

    pub fn run_config(&self) -> Result<RunConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_json_file(path)?,
            None => RunConfig::default(),
        };

        if !self.model_paths.is_empty() {
            config.model_paths = self.model_paths.clone();
        }
        if let Some(tokenizer_path) = &self.tokenizer_path {
            config.tokenizer_path = tokenizer_path.clone();
        }
        let performance_output_path = self
            .performance_output_path
            .clone()
            .or(config.performance_output_path.take())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PERFORMANCE_OUTPUT_PATH));
        config = config.performance_output_path(Some(performance_output_path));

        if let Some(temperature) = self.temperature {
            config = config.temperature(temperature);
        }
        if let Some(eval_mode) = self.eval_mode {
            config = config.eval_mode(eval_mode);
        }
        if let Some(kv_updater) = self.kv_updater {
            config = config.kv_updater(kv_updater);
        }
        if let Some(logits_scale) = self.logits_scale {
            config = config.logits_scale(logits_scale);
        }
        if let Some(logits_offset) = self.logits_offset {
            config = config.logits_offset(logits_offset);
        }
        if let Some(num_iters) = self.num_iters {
            config = config.num_iters(num_iters);
        }
        if let Some(seed) = self.seed {
            config = config.sampling_seed(SamplingSeed::Custom(seed));
        }
        Ok(config)
    }
}

fn format_stats(report: &BatchReport) -> String {
    let style_stats = Style::new().bold();
    let Some(summary) = &report.summary else {
        return style_stats.apply_to("no finished runs").to_string();
    };
    style_stats
        .apply_to(format!(
            "{} runs, {} prompt tokens, {} generated tokens, prefill {:.3}t/s, decode {:.3}t/s",
            summary.runs,
            summary.prompt_tokens,
            summary.generated_tokens,
            summary.prefill_tokens_per_second,
            summary.decode_tokens_per_second,
        ))
        .to_string()
}

/// Streams every prompt through `runner` and writes all fragments, in
/// emission order, to `output_path`.
///
/// Fragments of runs that failed are kept. The file is written before a
/// fatal error is returned.
pub fn run_batch_to_file<P>(
    runner: &mut Runner,
    prompts: &[String],
    seq_len: usize,
    system_prompt: Option<&str>,
    output_path: &Path,
    is_interrupted: &AtomicBool,
    progress: P,
) -> Result<(String, BatchReport), Box<dyn Error>>
where
    P: FnMut(&RunRecord),
{
    let mut text = String::new();
    let report = runner.run_batch_with_progress(
        prompts,
        seq_len,
        system_prompt,
        |fragment| {
            text.push_str(fragment);
            !is_interrupted.load(Ordering::SeqCst)
        },
        progress,
    );
    fs::write(output_path, &text)?;
    Ok((text, report?))
}

pub fn handle_run(args: RunArgs) -> Result<(), Box<dyn Error>> {
    let config = args.run_config()?;
    let prompts = args.prompts();
    let total_runs = (prompts.len() * config.num_iters) as u64;
    let mut runner = Runner::new(config)?;

    let is_interrupted = Arc::new(AtomicBool::new(false));
    let is_interrupted_for_ctrlc = is_interrupted.clone();
    if let Err(error) = ctrlc::set_handler(move || {
        is_interrupted_for_ctrlc.store(true, Ordering::SeqCst);
    }) {
        log::warn!("Ctrl-C will not interrupt generation: {error}");
    }

    let progress_bar = ProgressBar::new(total_runs);
    progress_bar.set_style(
        ProgressStyle::default_bar().template("{bar:40.green} {pos}/{len} {msg}")?,
    );

    let result = run_batch_to_file(
        &mut runner,
        &prompts,
        args.seq_len,
        args.system_prompt.as_deref(),
        &args.output_path,
        &is_interrupted,
        |record| {
            progress_bar.inc(1);
            progress_bar.set_message(format!(
                "{:.3}t/s",
                record.decode_tokens_per_second
            ));
        },
    );
    progress_bar.finish_and_clear();
    let (text, report) = result?;

    for failure in &report.failures {
        log::warn!(
            "Iteration {}, prompt {} failed: {}",
            failure.iteration,
            failure.prompt_index,
            failure.error
        );
    }
    if report.cancelled {
        log::warn!("Interrupted, keeping the text generated so far");
    }

    println!("{}\n\n{}", text, format_stats(&report));
    Ok(())
}
