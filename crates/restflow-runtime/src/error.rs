//! Runtime error types.

use std::path::PathBuf;

use restflow_workflow::NodeId;

/// Errors that abort a run as a whole.
///
/// Node-level failures never surface here; they are recorded as
/// [`crate::FailureReason`] in the run summary.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
  #[error("failed to prepare '{}': {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("node {0} is not part of the workflow")]
  UnknownNode(NodeId),

  #[error("worker task failed: {0}")]
  Worker(#[from] tokio::task::JoinError),
}
