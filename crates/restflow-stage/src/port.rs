use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Semantic type of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
  /// Volumetric image.
  Image,
  /// Transform matrix or warp field.
  Transform,
  /// Scalar parameter (number, string, flag).
  Scalar,
  /// Text, log or quality-control file.
  Text,
  /// Diagnostic plot.
  Plot,
}

impl PortType {
  /// Every type except `Scalar` is carried as a file path.
  pub fn is_file(&self) -> bool {
    !matches!(self, PortType::Scalar)
  }
}

impl fmt::Display for PortType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      PortType::Image => "image",
      PortType::Transform => "transform",
      PortType::Scalar => "scalar",
      PortType::Text => "text",
      PortType::Plot => "plot",
    };
    f.write_str(name)
  }
}

/// A named, typed port of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
  pub name: String,
  pub port_type: PortType,
}

impl PortSpec {
  pub fn new(name: impl Into<String>, port_type: PortType) -> Self {
    Self {
      name: name.into(),
      port_type,
    }
  }
}

/// A value flowing over an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortValue {
  File(PathBuf),
  Files(Vec<PathBuf>),
  Scalar(serde_json::Value),
}

impl PortValue {
  pub fn file(path: impl Into<PathBuf>) -> Self {
    PortValue::File(path.into())
  }

  pub fn scalar(value: impl Into<serde_json::Value>) -> Self {
    PortValue::Scalar(value.into())
  }

  /// File paths carried by this value; empty for scalars.
  pub fn paths(&self) -> Vec<&Path> {
    match self {
      PortValue::File(path) => vec![path.as_path()],
      PortValue::Files(paths) => paths.iter().map(PathBuf::as_path).collect(),
      PortValue::Scalar(_) => Vec::new(),
    }
  }

  pub fn as_scalar(&self) -> Option<&serde_json::Value> {
    match self {
      PortValue::Scalar(value) => Some(value),
      _ => None,
    }
  }

  /// Scalar rendered for use in a path: strings verbatim, other JSON as text.
  pub fn scalar_string(&self) -> Option<String> {
    match self.as_scalar()? {
      serde_json::Value::String(s) => Some(s.clone()),
      other => Some(other.to_string()),
    }
  }

  /// Whether this value can travel over a port of the given type.
  pub fn fits(&self, port_type: PortType) -> bool {
    match self {
      PortValue::Scalar(_) => !port_type.is_file(),
      _ => port_type.is_file(),
    }
  }

  /// Resolve relative paths against `base`.
  pub fn absolutize(self, base: &Path) -> Self {
    let fix = |p: PathBuf| if p.is_relative() { base.join(p) } else { p };
    match self {
      PortValue::File(path) => PortValue::File(fix(path)),
      PortValue::Files(paths) => PortValue::Files(paths.into_iter().map(fix).collect()),
      scalar => scalar,
    }
  }
}
