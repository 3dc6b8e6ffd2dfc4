use std::fmt::Write;
use std::path::{Path, PathBuf};

use restflow_stage::BranchKey;

use crate::graph::Graph;
use crate::node::{Edge, Node, NodeId};

/// An expanded, immutable workflow.
///
/// Node ids are dense and assigned in topological order, so iterating
/// [`Workflow::nodes`] front to back never visits a consumer before its
/// producers.
#[derive(Debug, Clone)]
pub struct Workflow {
  name: String,
  base_dir: PathBuf,
  nodes: Vec<Node>,
  edges: Vec<Edge>,
  /// node -> indices of edges targeting it.
  incoming: Vec<Vec<usize>>,
  graph: Graph,
}

impl Workflow {
  pub(crate) fn new(
    name: String,
    base_dir: PathBuf,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
  ) -> Self {
    let mut incoming = vec![Vec::new(); nodes.len()];
    for (index, edge) in edges.iter().enumerate() {
      incoming[edge.target.0].push(index);
    }
    let graph = Graph::new(nodes.len(), &edges);

    Self {
      name,
      base_dir,
      nodes,
      edges,
      incoming,
      graph,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn base_dir(&self) -> &Path {
    &self.base_dir
  }

  pub fn nodes(&self) -> &[Node] {
    &self.nodes
  }

  pub fn node(&self, id: NodeId) -> Option<&Node> {
    self.nodes.get(id.0)
  }

  pub fn edges(&self) -> &[Edge] {
    &self.edges
  }

  pub fn edge(&self, index: usize) -> Option<&Edge> {
    self.edges.get(index)
  }

  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  pub fn incoming(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
    self
      .incoming
      .get(id.0)
      .into_iter()
      .flatten()
      .map(|index| &self.edges[*index])
  }

  pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
    self
      .graph
      .outgoing_edges(id)
      .iter()
      .map(|index| &self.edges[*index])
  }

  pub fn upstream(&self, id: NodeId) -> &[NodeId] {
    self.graph.upstream(id)
  }

  pub fn downstream(&self, id: NodeId) -> &[NodeId] {
    self.graph.downstream(id)
  }

  pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
    self.graph.descendants(id)
  }

  pub fn topological_order(&self) -> impl Iterator<Item = NodeId> + '_ {
    self.nodes.iter().map(|n| n.id)
  }

  /// Distinct non-constant branch keys, in expansion order.
  pub fn branches(&self) -> Vec<BranchKey> {
    let mut branches: Vec<BranchKey> = Vec::new();
    for node in &self.nodes {
      if !node.address.branch.is_constant() && !branches.contains(&node.address.branch) {
        branches.push(node.address.branch.clone());
      }
    }
    branches
  }

  /// Look a node up by template name and branch key.
  pub fn find(&self, name: &str, branch: &BranchKey) -> Option<NodeId> {
    self
      .nodes
      .iter()
      .find(|n| n.address.name == name && &n.address.branch == branch)
      .map(|n| n.id)
  }

  /// `<base>/<workflow>/[_var_value/...]/<node>`.
  pub fn work_dir(&self, id: NodeId) -> Option<PathBuf> {
    let node = self.node(id)?;
    let mut dir = self.base_dir.join(&self.name);
    if let Some(branch_dir) = node.address.branch.dir() {
      dir.push(branch_dir);
    }
    dir.push(&node.address.name);
    Some(dir)
  }

  /// Graphviz rendering of the expanded graph.
  pub fn to_dot(&self) -> String {
    let mut dot = String::new();
    let _ = writeln!(dot, "digraph \"{}\" {{", self.name);
    let _ = writeln!(dot, "  rankdir=TB;");
    for node in &self.nodes {
      let _ = writeln!(
        dot,
        "  n{} [label=\"{}\\n({})\"];",
        node.id.0,
        node.address,
        node.stage.describe().name
      );
    }
    for edge in &self.edges {
      let _ = writeln!(
        dot,
        "  n{} -> n{} [label=\"{} -> {}\"];",
        edge.source.0, edge.target.0, edge.source_port, edge.target_port
      );
    }
    dot.push_str("}\n");
    dot
  }
}
