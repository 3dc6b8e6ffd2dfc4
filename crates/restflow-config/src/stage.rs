use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// External program implementing one processing stage.
///
/// The program receives a JSON request on stdin and answers with a JSON
/// object listing its outputs on stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
  pub program: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub args: Vec<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub env: BTreeMap<String, String>,
}
