mod recorder;
mod types;

pub use recorder::{PerformanceRecorder, PerformanceSummary, RunRecord};
pub use types::{RunStats, Stats, StepStats, TotalStats};
