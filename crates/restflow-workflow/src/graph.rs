use std::collections::HashSet;

use crate::node::{Edge, NodeId};

/// Adjacency view of an expanded workflow.
#[derive(Debug, Clone)]
pub struct Graph {
  /// node -> distinct downstream nodes.
  adjacency: Vec<Vec<NodeId>>,
  /// node -> distinct upstream nodes.
  reverse_adjacency: Vec<Vec<NodeId>>,
  /// node -> indices of edges leaving it.
  outgoing: Vec<Vec<usize>>,
}

impl Graph {
  /// Build a graph over `node_count` nodes from a list of edges.
  pub fn new(node_count: usize, edges: &[Edge]) -> Self {
    let mut adjacency: Vec<Vec<NodeId>> = vec![Vec::new(); node_count];
    let mut reverse_adjacency: Vec<Vec<NodeId>> = vec![Vec::new(); node_count];
    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); node_count];

    for (index, edge) in edges.iter().enumerate() {
      outgoing[edge.source.0].push(index);
      if !adjacency[edge.source.0].contains(&edge.target) {
        adjacency[edge.source.0].push(edge.target);
      }
      if !reverse_adjacency[edge.target.0].contains(&edge.source) {
        reverse_adjacency[edge.target.0].push(edge.source);
      }
    }

    Self {
      adjacency,
      reverse_adjacency,
      outgoing,
    }
  }

  pub fn downstream(&self, node: NodeId) -> &[NodeId] {
    self
      .adjacency
      .get(node.0)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  pub fn upstream(&self, node: NodeId) -> &[NodeId] {
    self
      .reverse_adjacency
      .get(node.0)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Indices of edges sourced from `node`.
  pub fn outgoing_edges(&self, node: NodeId) -> &[usize] {
    self
      .outgoing
      .get(node.0)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Every node reachable from `node`, excluding `node`.
  pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<NodeId> = self.downstream(node).to_vec();
    let mut found = Vec::new();

    while let Some(next) = stack.pop() {
      if seen.insert(next) {
        found.push(next);
        stack.extend_from_slice(self.downstream(next));
      }
    }

    found.sort();
    found
  }
}
