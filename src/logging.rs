// src/logging.rs
//
// Telemetry sinks for rollouts.
// - EventSink: trait used by the task runner
// - NoopSink:  discards all events
// - FileSink:  writes one JSON line per control step

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::config::TaskConfig;
use crate::reward::Extras;
use crate::state::BatchState;

/// One control step's telemetry payload.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: u64,
    pub version: &'static str,
    /// Batch means.
    pub reward_mean: f64,
    pub score_mean: f64,
    pub success_rate: f64,
    pub leaf_right_mean: f64,
    pub leaf_left_mean: f64,
    pub resets: usize,
    pub max_consecutive_successes: f64,
    pub max_success_scores: f64,
}

impl StepRecord {
    pub fn capture(step: u64, cfg: &TaskConfig, state: &BatchState, extras: &Extras) -> Self {
        let n = state.num_envs as f64;
        Self {
            step,
            version: cfg.version,
            reward_mean: state.reward.iter().sum::<f64>() / n,
            score_mean: state.score.iter().sum::<f64>() / n,
            success_rate: state.success.iter().sum::<f64>() / n,
            leaf_right_mean: extras.indicator_right,
            leaf_left_mean: extras.indicator_left,
            resets: state.reset.iter().filter(|&&r| r).count(),
            max_consecutive_successes: extras.max_consecutive_successes,
            max_success_scores: extras.max_success_scores,
        }
    }
}

/// Abstract sink for per-step telemetry.
pub trait EventSink {
    fn log_step(&mut self, record: &StepRecord);
}

/// Sink that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn log_step(&mut self, _record: &StepRecord) {
        // intentionally no-op
    }
}

/// JSONL file sink. Each step is one JSON object on its own line.
pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    /// Create a new sink writing to `path`.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl EventSink for FileSink {
    fn log_step(&mut self, record: &StepRecord) {
        // If logging fails we don't want to crash the rollout, so I/O
        // errors are deliberately ignored.
        if let Ok(line) = serde_json::to_string(record) {
            let _ = self.writer.write_all(line.as_bytes());
            let _ = self.writer.write_all(b"\n");
            let _ = self.writer.flush();
        }
    }
}
