use restflow_stage::PortType;
use serde::{Deserialize, Serialize};

/// Literal file name replacement. Every occurrence of `from` becomes `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
  pub from: String,
  pub to: String,
}

impl Substitution {
  pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
    Self {
      from: from.into(),
      to: to.into(),
    }
  }
}

/// One sink input port and where its artifacts land, relative to the sink root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkRoute {
  pub port: String,
  pub port_type: PortType,
  pub destination: String,
}

/// Routes plus the ordered rename table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkMapping {
  pub routes: Vec<SinkRoute>,
  pub substitutions: Vec<Substitution>,
}

impl SinkMapping {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(mut self, port: impl Into<String>, port_type: PortType, destination: impl Into<String>) -> Self {
    self.routes.push(SinkRoute {
      port: port.into(),
      port_type,
      destination: destination.into(),
    });
    self
  }

  pub fn substitute(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
    self.substitutions.push(Substitution::new(from, to));
    self
  }
}
