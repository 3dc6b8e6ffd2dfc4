use restflow_stage::PortType;
use thiserror::Error;

/// Graph construction errors. All of them are fatal for the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
  #[error("node not found: {0}")]
  NodeNotFound(String),

  #[error("node '{0}' is already defined")]
  DuplicateNode(String),

  #[error("node '{node}' has no port '{port}'")]
  UnknownPort { node: String, port: String },

  #[error("port type mismatch: {from} ({found}) cannot feed {to} ({expected})")]
  PortTypeMismatch {
    from: String,
    found: String,
    to: String,
    expected: PortType,
  },

  #[error("input '{node}.{port}' is already bound")]
  DuplicateBinding { node: String, port: String },

  #[error("edge {from} -> {to} would create a cycle")]
  CycleDetected { from: String, to: String },

  #[error("iteration variable '{0}' is not declared")]
  UndeclaredIterable(String),

  #[error("iteration variable '{0}' is already declared")]
  DuplicateIterable(String),

  #[error("iteration variable '{0}' has no values")]
  EmptyIterable(String),

  #[error("input '{node}.{port}' is not bound")]
  UnboundInput { node: String, port: String },

  #[error("invalid configuration for node '{node}': {message}")]
  InvalidConfig { node: String, message: String },
}
