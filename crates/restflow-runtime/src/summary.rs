use std::collections::BTreeMap;
use std::path::PathBuf;

use restflow_stage::BranchKey;
use restflow_workflow::NodeAddress;
use tracing::{info, warn};

use crate::state::NodeState;

/// Terminal state of one node.
#[derive(Debug, Clone)]
pub struct NodeReport {
  pub address: NodeAddress,
  pub state: NodeState,
  pub crash_report: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BranchTally {
  pub done: usize,
  pub failed: usize,
}

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
  pub run_id: String,
  pub workflow: String,
  pub nodes: Vec<NodeReport>,
  /// Nodes whose stage actually executed and succeeded.
  pub executed: usize,
  /// Nodes that reused a previous result.
  pub cached: usize,
  pub reclaimed: usize,
  /// The run-wide cancellation token fired.
  pub cancelled: bool,
  /// Tallies keyed by branch display form; constants under `<constant>`.
  pub branches: BTreeMap<String, BranchTally>,
}

impl RunSummary {
  pub(crate) fn tally(nodes: &[NodeReport]) -> BTreeMap<String, BranchTally> {
    let mut branches: BTreeMap<String, BranchTally> = BTreeMap::new();
    for report in nodes {
      let tally = branches.entry(report.address.branch.to_string()).or_default();
      match report.state {
        NodeState::Done { .. } => tally.done += 1,
        NodeState::Failed(_) => tally.failed += 1,
        _ => {}
      }
    }
    branches
  }

  pub fn node(&self, name: &str, branch: &BranchKey) -> Option<&NodeReport> {
    self
      .nodes
      .iter()
      .find(|r| r.address.name == name && &r.address.branch == branch)
  }

  pub fn failed(&self) -> impl Iterator<Item = &NodeReport> {
    self
      .nodes
      .iter()
      .filter(|r| matches!(r.state, NodeState::Failed(_)))
  }

  pub fn is_success(&self) -> bool {
    !self.cancelled && self.failed().next().is_none()
  }

  /// Log the per-branch outcome and every failure with its cause.
  pub fn log(&self) {
    for (branch, tally) in &self.branches {
      info!(
        run_id = %self.run_id,
        branch = %branch,
        done = tally.done,
        failed = tally.failed,
        "branch_summary"
      );
    }

    for report in self.failed() {
      if let NodeState::Failed(reason) = &report.state {
        warn!(
          run_id = %self.run_id,
          node = %report.address,
          error = %reason,
          crash_report = ?report.crash_report,
          "node_failed"
        );
      }
    }

    info!(
      run_id = %self.run_id,
      workflow = %self.workflow,
      executed = self.executed,
      cached = self.cached,
      reclaimed = self.reclaimed,
      failed = self.failed().count(),
      cancelled = self.cancelled,
      "run_summary"
    );
  }
}
