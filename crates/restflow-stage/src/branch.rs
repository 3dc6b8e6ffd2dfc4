use std::fmt;
use std::path::PathBuf;

use restflow_resolver::Bindings;
use serde::{Deserialize, Serialize};

/// Iteration values a node instance was expanded with.
///
/// Pairs are kept in iterable declaration order. The empty key marks a
/// constant node shared read-only by every branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchKey(Vec<(String, String)>);

impl BranchKey {
  pub fn constant() -> Self {
    Self(Vec::new())
  }

  pub fn new(pairs: Vec<(String, String)>) -> Self {
    Self(pairs)
  }

  pub fn with(mut self, variable: impl Into<String>, value: impl Into<String>) -> Self {
    self.0.push((variable.into(), value.into()));
    self
  }

  pub fn is_constant(&self) -> bool {
    self.0.is_empty()
  }

  pub fn get(&self, variable: &str) -> Option<&str> {
    self
      .0
      .iter()
      .find(|(var, _)| var == variable)
      .map(|(_, value)| value.as_str())
  }

  pub fn pairs(&self) -> &[(String, String)] {
    &self.0
  }

  /// Whether every pair of `other` is part of this key.
  pub fn contains(&self, other: &BranchKey) -> bool {
    other.0.iter().all(|pair| self.0.contains(pair))
  }

  /// Keep only the given variables.
  pub fn restrict(&self, variables: &[String]) -> BranchKey {
    BranchKey(
      self
        .0
        .iter()
        .filter(|(var, _)| variables.contains(var))
        .cloned()
        .collect(),
    )
  }

  pub fn bindings(&self) -> Bindings {
    self.0.iter().cloned().collect()
  }

  /// One `_<variable>_<value>` directory per pair; `None` for constants.
  ///
  /// Each component goes through [`path_safe`], so a value can never add a
  /// path separator or climb out of the workflow directory.
  pub fn dir(&self) -> Option<PathBuf> {
    if self.is_constant() {
      return None;
    }
    Some(
      self
        .0
        .iter()
        .map(|(var, value)| path_safe(&format!("_{}_{}", var, value)))
        .collect(),
    )
  }
}

/// Replace every character outside `[A-Za-z0-9-_.]` with `_`.
pub fn path_safe(text: &str) -> String {
  text
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
        c
      } else {
        '_'
      }
    })
    .collect()
}

impl fmt::Display for BranchKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_constant() {
      return f.write_str("<constant>");
    }
    let parts: Vec<String> = self
      .0
      .iter()
      .map(|(var, value)| format!("{}={}", var, value))
      .collect();
    f.write_str(&parts.join(","))
  }
}
