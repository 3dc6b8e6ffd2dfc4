use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::acquisition::AcquisitionConfig;
use crate::execution::ExecutionConfig;
use crate::stage::CommandSpec;

/// One row of a scan protocol table supplied through configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolEntry {
  pub fieldmap_id: String,
  /// `"y"` or `"y-"`.
  pub phase_encoding: String,
}

/// Immutable configuration of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
  /// Working directory root; node directories live below it.
  pub working_dir: String,
  /// Output archive root the sink publishes into.
  pub out_dir: String,
  /// Raw data root of the subject.
  pub data_dir: String,
  /// FreeSurfer subjects directory.
  pub freesurfer_dir: String,
  /// Reference image for spatial normalization.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub template: Option<String>,
  pub acquisition: AcquisitionConfig,
  /// Scan ids driving branch expansion, in branch order.
  pub scans: Vec<String>,
  #[serde(default)]
  pub execution: ExecutionConfig,
  /// External programs keyed by stage name.
  #[serde(default)]
  pub stages: BTreeMap<String, CommandSpec>,
  /// Replacement scan protocol table. The built-in table is used when absent.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub protocol: Option<BTreeMap<String, ProtocolEntry>>,
}
