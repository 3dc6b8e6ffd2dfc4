//! Crash reports for failed nodes.

use std::path::{Path, PathBuf};

use restflow_stage::{BranchKey, StageInputs};
use serde::Serialize;

/// Contents of `crash.json`.
#[derive(Debug, Clone, Serialize)]
pub struct CrashReport {
  pub run_id: String,
  pub node: String,
  pub stage: String,
  pub branch: BranchKey,
  pub config: serde_json::Value,
  pub inputs: StageInputs,
  pub error: String,
}

impl CrashReport {
  /// Write `<crash_dir>/<slug>/crash.json`, plus `stderr.log` when a log was
  /// captured. Returns the path of `crash.json`.
  pub async fn write(&self, crash_dir: &Path, slug: &str, log: Option<&str>) -> std::io::Result<PathBuf> {
    let dir = crash_dir.join(slug);
    tokio::fs::create_dir_all(&dir).await?;

    let path = dir.join("crash.json");
    let bytes = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;
    tokio::fs::write(&path, bytes).await?;

    if let Some(log) = log {
      tokio::fs::write(dir.join("stderr.log"), log).await?;
    }
    Ok(path)
  }
}
