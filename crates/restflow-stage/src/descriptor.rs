use serde::{Deserialize, Serialize};

use crate::port::{PortSpec, PortType};

/// Static description of a stage: identity, ports and default configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDescriptor {
  pub name: String,
  pub inputs: Vec<PortSpec>,
  pub outputs: Vec<PortSpec>,
  /// Stage-specific options. Nodes may override individual keys.
  pub config: serde_json::Value,
}

impl StageDescriptor {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      inputs: Vec::new(),
      outputs: Vec::new(),
      config: serde_json::Value::Object(serde_json::Map::new()),
    }
  }

  pub fn input(mut self, name: impl Into<String>, port_type: PortType) -> Self {
    self.inputs.push(PortSpec::new(name, port_type));
    self
  }

  pub fn output(mut self, name: impl Into<String>, port_type: PortType) -> Self {
    self.outputs.push(PortSpec::new(name, port_type));
    self
  }

  pub fn with_config(mut self, config: serde_json::Value) -> Self {
    self.config = config;
    self
  }

  pub fn input_port(&self, name: &str) -> Option<&PortSpec> {
    self.inputs.iter().find(|p| p.name == name)
  }

  pub fn output_port(&self, name: &str) -> Option<&PortSpec> {
    self.outputs.iter().find(|p| p.name == name)
  }
}
