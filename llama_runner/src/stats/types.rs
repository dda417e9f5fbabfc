use serde::{Deserialize, Serialize};

use crate::generator::{GenerateResult, PrefillResult};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RunStats {
    pub count: u64,
    pub average_duration: f64,
}

impl RunStats {
    fn from_durations(durations: &[f64]) -> Self {
        let count = durations.len();
        let average_duration = if count == 0 {
            0.0
        } else {
            durations.iter().sum::<f64>() / count as f64
        };
        Self {
            count: count as u64,
            average_duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StepStats {
    pub duration: f64,
    pub tokens_count: u64,
    pub tokens_per_second: f64,
    pub model_run: RunStats,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TotalStats {
    pub duration: f64,
    pub time_to_first_token: f64,
    pub tokens_count_input: u64,
    pub tokens_count_output: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Stats {
    pub prefill_stats: StepStats,
    pub generate_stats: Option<StepStats>,
    pub total_stats: TotalStats,
}

fn per_second(
    count: usize,
    duration: f64,
) -> f64 {
    if duration > 0.0 {
        count as f64 / duration
    } else {
        0.0
    }
}

impl Stats {
    /// Prefill throughput counts prompt tokens, decode throughput counts the
    /// tokens sampled after the first one.
    pub fn build(
        prefill_result: &PrefillResult,
        generate_results: &[GenerateResult],
        total_duration: f64,
        tokens_count_input: usize,
        tokens_count_output: usize,
    ) -> Self {
        let prefill_stats = StepStats {
            duration: prefill_result.duration,
            tokens_count: tokens_count_input as u64,
            tokens_per_second: per_second(
                tokens_count_input,
                prefill_result.duration,
            ),
            model_run: RunStats::from_durations(
                &prefill_result.forwardpass_durations,
            ),
        };

        let generate_stats = if generate_results.is_empty() {
            None
        } else {
            let durations: Vec<f64> =
                generate_results.iter().map(|result| result.duration).collect();
            let forwardpass_durations: Vec<f64> = generate_results
                .iter()
                .map(|result| result.forwardpass_duration)
                .collect();
            let duration = durations.iter().sum::<f64>();
            Some(StepStats {
                duration,
                tokens_count: generate_results.len() as u64,
                tokens_per_second: per_second(generate_results.len(), duration),
                model_run: RunStats::from_durations(&forwardpass_durations),
            })
        };

        Self {
            prefill_stats,
            generate_stats,
            total_stats: TotalStats {
                duration: total_duration,
                time_to_first_token: prefill_result.duration,
                tokens_count_input: tokens_count_input as u64,
                tokens_count_output: tokens_count_output as u64,
            },
        }
    }

    pub fn decode_duration(&self) -> f64 {
        self.generate_stats.as_ref().map_or(0.0, |stats| stats.duration)
    }

    pub fn decode_tokens_per_second(&self) -> f64 {
        self.generate_stats
            .as_ref()
            .map_or(0.0, |stats| stats.tokens_per_second)
    }
}
