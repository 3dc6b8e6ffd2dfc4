use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::branch::BranchKey;
use crate::descriptor::StageDescriptor;
use crate::error::StageError;
use crate::port::PortValue;

/// Resolved inputs, keyed by input port name.
pub type StageInputs = BTreeMap<String, PortValue>;

/// Produced outputs, keyed by output port name.
pub type StageOutputs = BTreeMap<String, PortValue>;

/// Where and on whose behalf a stage runs.
#[derive(Debug, Clone)]
pub struct StageContext {
  /// Display form of the node address, e.g. `moco[scan_id=...]`.
  pub address: String,
  pub branch: BranchKey,
  /// Node working directory. Exists when `execute` is called.
  pub work_dir: PathBuf,
  pub cancel: CancellationToken,
}

/// A black-box processing operation.
///
/// Implementations consume their declared inputs, write outputs below
/// `ctx.work_dir` and must not depend on the order of sibling stages.
#[async_trait]
pub trait Stage: Send + Sync {
  fn describe(&self) -> &StageDescriptor;

  async fn execute(
    &self,
    ctx: &StageContext,
    config: &serde_json::Value,
    inputs: &StageInputs,
  ) -> Result<StageOutputs, StageError>;
}
