use std::path::PathBuf;

use restflow_workflow::NodeAddress;

/// Lifecycle of a node within one run.
///
/// `Pending -> Ready -> Running -> Done | Failed`. A cached node moves from
/// `Pending` straight to `Done { cached: true }`; blocked and cancelled nodes
/// move straight to `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
  Pending,
  Ready,
  Running,
  Done { cached: bool },
  Failed(FailureReason),
}

impl NodeState {
  pub fn is_terminal(&self) -> bool {
    matches!(self, NodeState::Done { .. } | NodeState::Failed(_))
  }

  pub fn is_done(&self) -> bool {
    matches!(self, NodeState::Done { .. })
  }
}

/// Why a node ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
  #[error("stage failed: {message}")]
  Stage { message: String },

  #[error("input '{port}' refers to missing file '{}'", path.display())]
  MissingInputFile { port: String, path: PathBuf },

  #[error("upstream {upstream} did not produce output '{port}'")]
  MissingOutput { upstream: NodeAddress, port: String },

  #[error("sink write failed: {message}")]
  SinkWrite { message: String },

  #[error("blocked by failed upstream {upstream}")]
  Blocked { upstream: NodeAddress },

  #[error("cancelled")]
  Cancelled,

  #[error("internal error: {0}")]
  Internal(String),
}

impl FailureReason {
  /// Whether the failure originated in this node rather than being inherited.
  pub fn is_origin(&self) -> bool {
    !matches!(self, FailureReason::Blocked { .. } | FailureReason::Cancelled)
  }
}
