use std::fmt;
use std::sync::Arc;

use restflow_stage::{BranchKey, PortValue, Stage, path_safe};
use serde::{Deserialize, Serialize};

/// Index of a node in an expanded [`crate::Workflow`].
///
/// Ids are assigned in topological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// Unique address of a node: template name plus branch key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
  pub name: String,
  pub branch: BranchKey,
}

impl NodeAddress {
  pub fn new(name: impl Into<String>, branch: BranchKey) -> Self {
    Self {
      name: name.into(),
      branch,
    }
  }

  /// Filesystem-safe form, e.g. `moco__scan_id_ses-02_task-rest_acq-AP_run-01_bold`.
  pub fn slug(&self) -> String {
    let mut slug = self.name.clone();
    for (var, value) in self.branch.pairs() {
      slug.push_str("__");
      slug.push_str(var);
      slug.push('_');
      slug.push_str(value);
    }
    path_safe(&slug)
  }
}

impl fmt::Display for NodeAddress {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.branch.is_constant() {
      f.write_str(&self.name)
    } else {
      write!(f, "{}[{}]", self.name, self.branch)
    }
  }
}

/// Where an input port gets its value from.
#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
  /// Index into [`crate::Workflow::edges`].
  Edge(usize),
  Literal(PortValue),
}

/// `(source, output port) -> (target, input port)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
  pub source: NodeId,
  pub source_port: String,
  pub target: NodeId,
  pub target_port: String,
}

/// A named, ordered set of values a part of the graph is replicated over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationVariable {
  pub name: String,
  pub values: Vec<String>,
}

/// A stage instantiated in one branch.
#[derive(Clone)]
pub struct Node {
  pub id: NodeId,
  pub address: NodeAddress,
  pub stage: Arc<dyn Stage>,
  /// Descriptor defaults overlaid with node overrides.
  pub config: serde_json::Value,
  pub inputs: std::collections::BTreeMap<String, InputSource>,
  /// Extra attempts after a retryable failure.
  pub retries: u32,
}

impl fmt::Debug for Node {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Node")
      .field("id", &self.id)
      .field("address", &self.address)
      .field("stage", &self.stage.describe().name)
      .field("config", &self.config)
      .field("inputs", &self.inputs)
      .field("retries", &self.retries)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_address_display_and_slug() {
    let constant = NodeAddress::new("anat_files", BranchKey::constant());
    assert_eq!(constant.to_string(), "anat_files");
    assert_eq!(constant.slug(), "anat_files");

    let branched = NodeAddress::new(
      "moco",
      BranchKey::constant().with("scan_id", "ses-02_task-rest_acq-AP_run-01_bold"),
    );
    assert_eq!(
      branched.to_string(),
      "moco[scan_id=ses-02_task-rest_acq-AP_run-01_bold]"
    );
    assert_eq!(
      branched.slug(),
      "moco__scan_id_ses-02_task-rest_acq-AP_run-01_bold"
    );
  }

  #[test]
  fn test_slug_replaces_separators() {
    let address = NodeAddress::new("sink", BranchKey::constant().with("scan_id", "a/b c"));
    assert_eq!(address.slug(), "sink__scan_id_a_b_c");
  }
}
