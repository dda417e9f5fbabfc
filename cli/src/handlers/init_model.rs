use std::path::PathBuf;

use clap::{Args, ValueEnum};
use llama_runner::{
    DataType,
    backends::cpu::CpuWeights,
    config::{LogitsQuantization, ModelConfig},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum QuantizedLogits {
    U8,
    U16,
}

impl From<QuantizedLogits> for DataType {
    fn from(value: QuantizedLogits) -> Self {
        match value {
            QuantizedLogits::U8 => DataType::U8,
            QuantizedLogits::U16 => DataType::U16,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct InitModelArgs {
    /// Shard to write, repeat to spread the weights over several files
    #[arg(long = "output-path", required = true)]
    pub output_paths: Vec<PathBuf>,
    #[arg(long, default_value_t = 256)]
    pub vocab_size: usize,
    #[arg(long, default_value_t = 64)]
    pub hidden_dim: usize,
    #[arg(long, default_value_t = 32)]
    pub head_dim: usize,
    #[arg(long, default_value_t = 2)]
    pub num_layers: usize,
    #[arg(long, default_value_t = 512)]
    pub context_length: usize,
    #[arg(long, default_value_t = 16)]
    pub prefill_step_size: usize,
    /// Emit quantized logits instead of f32
    #[arg(long, value_enum)]
    pub quantize_logits: Option<QuantizedLogits>,
    #[arg(long, default_value_t = 0.05)]
    pub quantization_scale: f32,
    #[arg(long, allow_negative_numbers = true)]
    pub quantization_offset: Option<i32>,
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

impl InitModelArgs {
    pub fn model_config(&self) -> ModelConfig {
        let logits_quantization = self.quantize_logits.map(|kind| {
            let data_type = DataType::from(kind);
            let offset = self.quantization_offset.unwrap_or(match kind {
                QuantizedLogits::U8 => 128,
                QuantizedLogits::U16 => 32768,
            });
            LogitsQuantization {
                data_type,
                scale: self.quantization_scale,
                offset,
            }
        });
        ModelConfig::new(
            self.vocab_size,
            self.hidden_dim,
            self.head_dim,
            self.num_layers,
            self.context_length,
            self.prefill_step_size,
        )
        .logits_quantization(logits_quantization)
    }
}

/// Writes randomly initialized reference weights.
pub fn handle_init_model(
    args: InitModelArgs
) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.model_config();
    config.validate()?;

    let weights = CpuWeights::random(config, args.seed);
    weights.write_shards(args.output_paths.as_slice())?;
    for path in &args.output_paths {
        println!("{}", path.display());
    }
    Ok(())
}
