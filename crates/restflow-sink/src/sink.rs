use std::path::{Path, PathBuf};

use restflow_resolver::render;
use restflow_stage::BranchKey;
use tracing::debug;

use crate::error::SinkError;
use crate::mapping::Substitution;

/// Copies artifacts into `root / <rendered destination> / <renamed file>`.
#[derive(Debug, Clone)]
pub struct OutputSink {
  root: PathBuf,
  substitutions: Vec<Substitution>,
}

impl OutputSink {
  pub fn new(root: impl Into<PathBuf>, substitutions: Vec<Substitution>) -> Self {
    Self {
      root: root.into(),
      substitutions,
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Apply the rename table to a file name. Rules run in order, each on the
  /// result of the previous one.
  pub fn rename(&self, file_name: &str) -> String {
    self
      .substitutions
      .iter()
      .fold(file_name.to_string(), |name, rule| name.replace(&rule.from, &rule.to))
  }

  /// Final archive path of `source` published under `destination`.
  pub fn destination(&self, branch: &BranchKey, destination: &str, source: &Path) -> Result<PathBuf, SinkError> {
    let dir = render(destination, &branch.bindings())?;

    let file_name = source
      .file_name()
      .and_then(|n| n.to_str())
      .ok_or_else(|| SinkError::NoFileName(source.to_path_buf()))?;

    Ok(self.root.join(dir).join(self.rename(file_name)))
  }

  /// Copy `source` into the archive, creating directories as needed.
  pub async fn publish(&self, branch: &BranchKey, destination: &str, source: &Path) -> Result<PathBuf, SinkError> {
    let target = self.destination(branch, destination, source)?;
    let write_err = |source_err: std::io::Error| SinkError::Write {
      from: source.to_path_buf(),
      to: target.clone(),
      source: source_err,
    };

    if let Some(parent) = target.parent() {
      tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    tokio::fs::copy(source, &target).await.map_err(write_err)?;

    debug!(from = %source.display(), to = %target.display(), "published artifact");
    Ok(target)
  }
}
