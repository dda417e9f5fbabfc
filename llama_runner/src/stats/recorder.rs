use std::{
    fmt,
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::session::{FinishReason, Output};

/// Timing of one prompt in one iteration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RunRecord {
    pub iteration: usize,
    pub prompt_index: usize,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub prefill_seconds: f64,
    pub time_to_first_token: f64,
    pub decode_seconds: f64,
    pub prefill_tokens_per_second: f64,
    pub decode_tokens_per_second: f64,
    pub finish_reason: FinishReason,
}

impl RunRecord {
    pub fn new(
        iteration: usize,
        prompt_index: usize,
        output: &Output,
    ) -> Self {
        let stats = &output.stats;
        Self {
            iteration,
            prompt_index,
            prompt_tokens: output.prompt_tokens.len(),
            generated_tokens: output.generated_tokens.len(),
            prefill_seconds: stats.prefill_stats.duration,
            time_to_first_token: stats.total_stats.time_to_first_token,
            decode_seconds: stats.decode_duration(),
            prefill_tokens_per_second: stats.prefill_stats.tokens_per_second,
            decode_tokens_per_second: stats.decode_tokens_per_second(),
            finish_reason: output.finish_reason,
        }
    }
}

impl fmt::Display for RunRecord {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "run iteration={} prompt={} prompt_tokens={} generated_tokens={} \
             prefill_seconds={:.6} time_to_first_token={:.6} decode_seconds={:.6} \
             prefill_tokens_per_second={:.3} decode_tokens_per_second={:.3} \
             finish_reason={}",
            self.iteration,
            self.prompt_index,
            self.prompt_tokens,
            self.generated_tokens,
            self.prefill_seconds,
            self.time_to_first_token,
            self.decode_seconds,
            self.prefill_tokens_per_second,
            self.decode_tokens_per_second,
            self.finish_reason,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PerformanceSummary {
    pub runs: usize,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub prefill_seconds: f64,
    pub decode_seconds: f64,
    pub prefill_tokens_per_second: f64,
    pub decode_tokens_per_second: f64,
}

impl fmt::Display for PerformanceSummary {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        writeln!(
            f,
            "summary runs={} prompt_tokens={} generated_tokens={} \
             prefill_seconds={:.6} decode_seconds={:.6} \
             prefill_tokens_per_second={:.3}",
            self.runs,
            self.prompt_tokens,
            self.generated_tokens,
            self.prefill_seconds,
            self.decode_seconds,
            self.prefill_tokens_per_second,
        )?;
        write!(f, "decode_tokens_per_second={:.3}", self.decode_tokens_per_second)
    }
}

/// Collects one [`RunRecord`] per run and mirrors them to a text log.
///
/// The log is truncated when the recorder is created. I/O failures are
/// logged and otherwise ignored so they never interrupt generation.
pub struct PerformanceRecorder {
    path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
    records: Vec<RunRecord>,
}

impl PerformanceRecorder {
    pub fn new(path: Option<&Path>) -> Self {
        let writer = path.and_then(|path| match File::create(path) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(error) => {
                log::warn!(
                    "Unable to create performance log {}: {error}",
                    path.display()
                );
                None
            },
        });
        Self {
            path: path.map(Path::to_path_buf),
            writer,
            records: Vec::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn records(&self) -> &[RunRecord] {
        &self.records
    }

    pub fn record(
        &mut self,
        record: RunRecord,
    ) {
        log::info!("{record}");
        self.write_line(&record.to_string());
        self.records.push(record);
    }

    /// Aggregate over every recorded run, `None` before the first one.
    pub fn summary(&self) -> Option<PerformanceSummary> {
        if self.records.is_empty() {
            return None;
        }

        let prompt_tokens: usize =
            self.records.iter().map(|record| record.prompt_tokens).sum();
        let generated_tokens: usize =
            self.records.iter().map(|record| record.generated_tokens).sum();
        let prefill_seconds: f64 =
            self.records.iter().map(|record| record.prefill_seconds).sum();
        let decode_seconds: f64 =
            self.records.iter().map(|record| record.decode_seconds).sum();
        // The first token of every run is sampled from the prefill logits.
        let decoded_tokens: usize = self
            .records
            .iter()
            .map(|record| record.generated_tokens.saturating_sub(1))
            .sum();

        let rate = |count: usize, seconds: f64| {
            if seconds > 0.0 {
                count as f64 / seconds
            } else {
                0.0
            }
        };

        Some(PerformanceSummary {
            runs: self.records.len(),
            prompt_tokens,
            generated_tokens,
            prefill_seconds,
            decode_seconds,
            prefill_tokens_per_second: rate(prompt_tokens, prefill_seconds),
            decode_tokens_per_second: rate(decoded_tokens, decode_seconds),
        })
    }

    /// Appends the summary to the log and flushes it.
    pub fn finish(&mut self) -> Option<PerformanceSummary> {
        let summary = self.summary();
        if let Some(summary) = &summary {
            log::info!("{summary}");
            self.write_line(&summary.to_string());
        }
        summary
    }

    fn write_line(
        &mut self,
        line: &str,
    ) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let result: io::Result<()> = writeln!(writer, "{line}")
            .and_then(|_| writer.flush());
        if let Err(error) = result {
            log::warn!("Unable to write performance log: {error}");
        }
    }
}
