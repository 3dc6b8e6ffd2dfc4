use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by a stage execution.
#[derive(Debug, Error)]
pub enum StageError {
  /// The stage ran and reported failure.
  #[error("{message}")]
  Failed {
    message: String,
    /// Captured diagnostic output (stderr, tool log).
    log: Option<String>,
  },

  /// Writing an artifact to its destination failed. Retryable.
  #[error("failed to write '{}': {source}", path.display())]
  SinkWrite {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// Execution was cancelled before the stage finished.
  #[error("stage execution cancelled")]
  Cancelled,
}

impl StageError {
  pub fn failed(message: impl Into<String>) -> Self {
    StageError::Failed {
      message: message.into(),
      log: None,
    }
  }

  /// Whether re-running the same node may succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, StageError::SinkWrite { .. })
  }

  /// Captured diagnostic output, if any.
  pub fn log(&self) -> Option<&str> {
    match self {
      StageError::Failed { log, .. } => log.as_deref(),
      _ => None,
    }
  }
}

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("stage '{0}' is already registered")]
  DuplicateStage(String),

  #[error("stage '{0}' is not registered")]
  UnknownStage(String),
}
