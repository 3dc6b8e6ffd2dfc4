use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use restflow_stage::{BranchKey, PortType, PortValue, Stage};
use serde_json::Value;

use crate::error::WorkflowError;
use crate::node::{Edge, InputSource, IterationVariable, Node, NodeAddress, NodeId};
use crate::workflow::Workflow;

#[derive(Debug, Clone)]
enum Binding {
  Edge { from: usize, port: String },
  Literal(PortValue),
  Iteration(String),
}

struct NodeTemplate {
  name: String,
  stage: Arc<dyn Stage>,
  config: Value,
  bindings: BTreeMap<String, Binding>,
  retries: u32,
}

/// Incrementally assembles a workflow template.
///
/// Every call validates immediately, so a builder that returned `Ok` for
/// all calls only has [`WorkflowError::UnboundInput`] left to report from
/// [`WorkflowBuilder::build`].
pub struct WorkflowBuilder {
  name: String,
  iterables: Vec<IterationVariable>,
  templates: Vec<NodeTemplate>,
  index: HashMap<String, usize>,
  /// Template-level dependency graph, node weight = template index.
  graph: DiGraph<usize, ()>,
}

impl WorkflowBuilder {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      iterables: Vec::new(),
      templates: Vec::new(),
      index: HashMap::new(),
      graph: DiGraph::new(),
    }
  }

  pub fn add_node(&mut self, name: impl Into<String>, stage: Arc<dyn Stage>) -> Result<(), WorkflowError> {
    let name = name.into();
    if self.index.contains_key(&name) {
      return Err(WorkflowError::DuplicateNode(name));
    }

    let config = stage.describe().config.clone();
    let position = self.templates.len();
    self.graph.add_node(position);
    self.index.insert(name.clone(), position);
    self.templates.push(NodeTemplate {
      name,
      stage,
      config,
      bindings: BTreeMap::new(),
      retries: 0,
    });
    Ok(())
  }

  /// Overlay `overrides` on the node's current configuration, key by key.
  pub fn configure(&mut self, node: &str, overrides: Value) -> Result<(), WorkflowError> {
    let position = self.position(node)?;
    let Value::Object(overrides) = overrides else {
      return Err(WorkflowError::InvalidConfig {
        node: node.to_string(),
        message: "overrides must be a JSON object".to_string(),
      });
    };

    let template = &mut self.templates[position];
    match &mut template.config {
      Value::Object(config) => {
        for (key, value) in overrides {
          config.insert(key, value);
        }
      }
      other => *other = Value::Object(overrides),
    }
    Ok(())
  }

  /// Bind an input port to a fixed value.
  pub fn set_input(&mut self, node: &str, port: &str, value: PortValue) -> Result<(), WorkflowError> {
    let position = self.position(node)?;
    let expected = self.input_type(position, port)?;

    if !value.fits(expected) {
      let found = match value {
        PortValue::Scalar(_) => "scalar value",
        PortValue::File(_) | PortValue::Files(_) => "file value",
      };
      return Err(WorkflowError::PortTypeMismatch {
        from: "literal".to_string(),
        found: found.to_string(),
        to: format!("{}.{}", node, port),
        expected,
      });
    }

    self.bind(position, port, Binding::Literal(value))
  }

  pub fn declare_iterable<I, S>(&mut self, variable: impl Into<String>, values: I) -> Result<(), WorkflowError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let name = variable.into();
    if self.iterables.iter().any(|v| v.name == name) {
      return Err(WorkflowError::DuplicateIterable(name));
    }

    let values: Vec<String> = values.into_iter().map(Into::into).collect();
    if values.is_empty() {
      return Err(WorkflowError::EmptyIterable(name));
    }

    self.iterables.push(IterationVariable { name, values });
    Ok(())
  }

  /// Bind a scalar input to the current value of an iteration variable.
  pub fn iterate(&mut self, node: &str, port: &str, variable: &str) -> Result<(), WorkflowError> {
    let position = self.position(node)?;
    let expected = self.input_type(position, port)?;

    if !self.iterables.iter().any(|v| v.name == variable) {
      return Err(WorkflowError::UndeclaredIterable(variable.to_string()));
    }
    if expected != PortType::Scalar {
      return Err(WorkflowError::PortTypeMismatch {
        from: format!("iterable '{}'", variable),
        found: PortType::Scalar.to_string(),
        to: format!("{}.{}", node, port),
        expected,
      });
    }

    self.bind(position, port, Binding::Iteration(variable.to_string()))
  }

  pub fn connect(&mut self, src: &str, out_port: &str, dst: &str, in_port: &str) -> Result<(), WorkflowError> {
    let from = self.position(src)?;
    let to = self.position(dst)?;

    let found = self.templates[from]
      .stage
      .describe()
      .output_port(out_port)
      .map(|p| p.port_type)
      .ok_or_else(|| WorkflowError::UnknownPort {
        node: src.to_string(),
        port: out_port.to_string(),
      })?;
    let expected = self.input_type(to, in_port)?;

    if found != expected {
      return Err(WorkflowError::PortTypeMismatch {
        from: format!("{}.{}", src, out_port),
        found: found.to_string(),
        to: format!("{}.{}", dst, in_port),
        expected,
      });
    }

    if self.templates[to].bindings.contains_key(in_port) {
      return Err(WorkflowError::DuplicateBinding {
        node: dst.to_string(),
        port: in_port.to_string(),
      });
    }

    let (a, b) = (NodeIndex::new(from), NodeIndex::new(to));
    if from == to || has_path_connecting(&self.graph, b, a, None) {
      return Err(WorkflowError::CycleDetected {
        from: src.to_string(),
        to: dst.to_string(),
      });
    }

    self.graph.update_edge(a, b, ());
    self.bind(
      to,
      in_port,
      Binding::Edge {
        from,
        port: out_port.to_string(),
      },
    )
  }

  /// Connect several `(output, input)` port pairs between the same two nodes.
  pub fn connect_many(&mut self, src: &str, dst: &str, ports: &[(&str, &str)]) -> Result<(), WorkflowError> {
    for (out_port, in_port) in ports {
      self.connect(src, out_port, dst, in_port)?;
    }
    Ok(())
  }

  /// Extra attempts granted after a retryable failure.
  pub fn set_retries(&mut self, node: &str, retries: u32) -> Result<(), WorkflowError> {
    let position = self.position(node)?;
    self.templates[position].retries = retries;
    Ok(())
  }

  /// Validate the template and expand it over the declared iterables.
  pub fn build(&self, base_dir: impl Into<PathBuf>) -> Result<Workflow, WorkflowError> {
    for template in &self.templates {
      for port in &template.stage.describe().inputs {
        if !template.bindings.contains_key(&port.name) {
          return Err(WorkflowError::UnboundInput {
            node: template.name.clone(),
            port: port.name.clone(),
          });
        }
      }
    }

    let order = toposort(&self.graph, None).map_err(|cycle| {
      let name = self.templates[self.graph[cycle.node_id()]].name.clone();
      WorkflowError::CycleDetected {
        from: name.clone(),
        to: name,
      }
    })?;
    let order: Vec<usize> = order.into_iter().map(|ix| self.graph[ix]).collect();

    let scopes = self.scopes(&order);

    let mut nodes: Vec<Node> = Vec::new();
    let mut edges: Vec<Edge> = Vec::new();
    let mut instances: HashMap<(usize, BranchKey), NodeId> = HashMap::new();

    for &position in &order {
      let template = &self.templates[position];

      for key in self.branch_keys(&scopes[position]) {
        let id = NodeId(nodes.len());
        let mut inputs = BTreeMap::new();

        for (port, binding) in &template.bindings {
          let source = match binding {
            Binding::Literal(value) => InputSource::Literal(value.clone()),
            Binding::Iteration(variable) => {
              let value = key
                .get(variable)
                .ok_or_else(|| WorkflowError::UndeclaredIterable(variable.clone()))?;
              InputSource::Literal(PortValue::scalar(value))
            }
            Binding::Edge { from, port: out_port } => {
              let source_key = key.restrict(&scopes[*from]);
              let source = *instances.get(&(*from, source_key)).ok_or_else(|| {
                WorkflowError::NodeNotFound(self.templates[*from].name.clone())
              })?;
              edges.push(Edge {
                source,
                source_port: out_port.clone(),
                target: id,
                target_port: port.clone(),
              });
              InputSource::Edge(edges.len() - 1)
            }
          };
          inputs.insert(port.clone(), source);
        }

        instances.insert((position, key.clone()), id);
        nodes.push(Node {
          id,
          address: NodeAddress::new(template.name.clone(), key),
          stage: template.stage.clone(),
          config: template.config.clone(),
          inputs,
          retries: template.retries,
        });
      }
    }

    Ok(Workflow::new(
      self.name.clone(),
      base_dir.into(),
      nodes,
      edges,
    ))
  }

  fn position(&self, node: &str) -> Result<usize, WorkflowError> {
    self
      .index
      .get(node)
      .copied()
      .ok_or_else(|| WorkflowError::NodeNotFound(node.to_string()))
  }

  fn input_type(&self, position: usize, port: &str) -> Result<PortType, WorkflowError> {
    let template = &self.templates[position];
    template
      .stage
      .describe()
      .input_port(port)
      .map(|p| p.port_type)
      .ok_or_else(|| WorkflowError::UnknownPort {
        node: template.name.clone(),
        port: port.to_string(),
      })
  }

  fn bind(&mut self, position: usize, port: &str, binding: Binding) -> Result<(), WorkflowError> {
    let template = &mut self.templates[position];
    if template.bindings.contains_key(port) {
      return Err(WorkflowError::DuplicateBinding {
        node: template.name.clone(),
        port: port.to_string(),
      });
    }
    template.bindings.insert(port.to_string(), binding);
    Ok(())
  }

  /// Iteration scope per template index, in declaration order of the variables.
  fn scopes(&self, order: &[usize]) -> Vec<Vec<String>> {
    let mut used: Vec<Vec<bool>> = vec![vec![false; self.iterables.len()]; self.templates.len()];

    for &position in order {
      let mut own = vec![false; self.iterables.len()];
      for binding in self.templates[position].bindings.values() {
        match binding {
          Binding::Iteration(variable) => {
            if let Some(i) = self.iterables.iter().position(|v| &v.name == variable) {
              own[i] = true;
            }
          }
          Binding::Edge { from, .. } => {
            for (i, flag) in used[*from].iter().enumerate() {
              own[i] |= *flag;
            }
          }
          Binding::Literal(_) => {}
        }
      }
      used[position] = own;
    }

    used
      .into_iter()
      .map(|flags| {
        self
          .iterables
          .iter()
          .zip(flags)
          .filter(|(_, flag)| *flag)
          .map(|(v, _)| v.name.clone())
          .collect()
      })
      .collect()
  }

  /// Cartesian product of the scope's values; the first variable varies slowest.
  fn branch_keys(&self, scope: &[String]) -> Vec<BranchKey> {
    let mut keys = vec![BranchKey::constant()];
    for name in scope {
      let Some(variable) = self.iterables.iter().find(|v| &v.name == name) else {
        continue;
      };
      keys = keys
        .into_iter()
        .flat_map(|key| {
          variable
            .values
            .iter()
            .map(move |value| key.clone().with(name.clone(), value.clone()))
        })
        .collect();
    }
    keys
  }
}
