use serde::{Deserialize, Serialize};

/// How many artifacts the output sink publishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkVerbosity {
  /// Only the artifacts downstream analyses read.
  #[default]
  Minimal,
  /// Additionally the discarded-volume series and every fieldmap transform.
  Full,
}

/// Scheduler and storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
  /// Upper bound on stages running at the same time.
  pub max_concurrency: usize,
  /// Delete intermediate working directories once all consumers finished.
  pub reclaim_work_dirs: bool,
  /// Short-circuit nodes whose completion marker matches their inputs.
  pub use_cache: bool,
  /// Crash report directory. Defaults to `<working_dir>/crash_files`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub crash_dir: Option<String>,
  /// Extra attempts granted to sink nodes after a write failure.
  pub sink_retries: u32,
  pub verbosity: SinkVerbosity,
}

impl Default for ExecutionConfig {
  fn default() -> Self {
    Self {
      max_concurrency: 4,
      reclaim_work_dirs: true,
      use_cache: true,
      crash_dir: None,
      sink_retries: 1,
      verbosity: SinkVerbosity::Minimal,
    }
  }
}
