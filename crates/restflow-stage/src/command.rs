//! External program stages.
//!
//! The program is started in the node working directory. It reads one JSON
//! request from stdin:
//!
//! ```json
//! {
//!   "stage": "moco",
//!   "address": "moco[scan_id=ses-02_task-rest_acq-AP_run-01_bold]",
//!   "branch": { "scan_id": "ses-02_task-rest_acq-AP_run-01_bold" },
//!   "work_dir": "/work/lsd_resting/_scan_id_.../moco",
//!   "config": { ... },
//!   "inputs": { "epi": { "file": "/work/.../rest_vol_removed.nii.gz" } }
//! }
//! ```
//!
//! and answers on stdout with `{ "outputs": { "<port>": <PortValue>, ... } }`.
//! Relative output paths are taken relative to the working directory. Stderr
//! is kept in [`STAGE_LOG_FILE`] and attached to failures.

use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use restflow_config::CommandSpec;
use restflow_resolver::Bindings;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::descriptor::StageDescriptor;
use crate::error::StageError;
use crate::stage::{Stage, StageContext, StageInputs, StageOutputs};

/// File in the working directory holding the program's stderr.
pub const STAGE_LOG_FILE: &str = "stage.log";

#[derive(Serialize)]
struct CommandRequest<'a> {
  stage: &'a str,
  address: &'a str,
  branch: Bindings,
  work_dir: &'a Path,
  config: &'a serde_json::Value,
  inputs: &'a StageInputs,
}

#[derive(Deserialize)]
struct CommandResponse {
  outputs: StageOutputs,
}

/// A stage implemented by an external program.
pub struct CommandStage {
  descriptor: StageDescriptor,
  command: CommandSpec,
}

impl CommandStage {
  pub fn new(descriptor: StageDescriptor, command: CommandSpec) -> Self {
    Self {
      descriptor,
      command,
    }
  }
}

#[async_trait]
impl Stage for CommandStage {
  fn describe(&self) -> &StageDescriptor {
    &self.descriptor
  }

  async fn execute(
    &self,
    ctx: &StageContext,
    config: &serde_json::Value,
    inputs: &StageInputs,
  ) -> Result<StageOutputs, StageError> {
    let program = &self.command.program;
    let request = CommandRequest {
      stage: &self.descriptor.name,
      address: &ctx.address,
      branch: ctx.branch.bindings(),
      work_dir: &ctx.work_dir,
      config,
      inputs,
    };
    let request = serde_json::to_vec(&request)
      .map_err(|e| StageError::failed(format!("failed to serialize request: {}", e)))?;

    debug!(program = %program, work_dir = %ctx.work_dir.display(), "spawning stage command");

    let mut child = Command::new(program)
      .args(&self.command.args)
      .envs(&self.command.env)
      .current_dir(&ctx.work_dir)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()
      .map_err(|e| StageError::failed(format!("failed to spawn '{}': {}", program, e)))?;

    if let Some(mut stdin) = child.stdin.take() {
      match stdin.write_all(&request).await {
        Ok(()) => {}
        // The program may legitimately exit without reading its request.
        Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
        Err(e) => {
          return Err(StageError::failed(format!(
            "failed to write request to '{}': {}",
            program, e
          )));
        }
      }
    }

    let output = tokio::select! {
      output = child.wait_with_output() => output
        .map_err(|e| StageError::failed(format!("failed to wait for '{}': {}", program, e)))?,
      _ = ctx.cancel.cancelled() => return Err(StageError::Cancelled),
    };

    let log = String::from_utf8_lossy(&output.stderr).into_owned();
    if let Err(e) = tokio::fs::write(ctx.work_dir.join(STAGE_LOG_FILE), &output.stderr).await {
      warn!(error = %e, "failed to persist stage log");
    }

    if !output.status.success() {
      return Err(StageError::Failed {
        message: format!("'{}' exited with {}", program, output.status),
        log: Some(log),
      });
    }

    let response: CommandResponse =
      serde_json::from_slice(&output.stdout).map_err(|e| StageError::Failed {
        message: format!("invalid response from '{}': {}", program, e),
        log: Some(log),
      })?;

    Ok(
      response
        .outputs
        .into_iter()
        .map(|(port, value)| (port, value.absolutize(&ctx.work_dir)))
        .collect(),
    )
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::branch::BranchKey;
  use crate::port::{PortType, PortValue};
  use std::collections::BTreeMap;
  use tokio_util::sync::CancellationToken;

  fn shell(script: &str) -> CommandSpec {
    CommandSpec {
      program: "sh".to_string(),
      args: vec!["-c".to_string(), script.to_string()],
      env: BTreeMap::new(),
    }
  }

  fn context(dir: &Path) -> StageContext {
    StageContext {
      address: "moco[scan_id=a]".to_string(),
      branch: BranchKey::constant().with("scan_id", "a"),
      work_dir: dir.to_path_buf(),
      cancel: CancellationToken::new(),
    }
  }

  fn descriptor() -> StageDescriptor {
    StageDescriptor::new("moco")
      .input("epi", PortType::Image)
      .output("epi_moco", PortType::Image)
  }

  #[tokio::test]
  async fn test_command_outputs_resolved_against_work_dir() {
    let dir = tempfile::tempdir().unwrap();
    let stage = CommandStage::new(
      descriptor(),
      shell(r#"cat > request.json; echo '{"outputs": {"epi_moco": {"file": "rest_realigned.nii.gz"}}}'"#),
    );

    let mut inputs = StageInputs::new();
    inputs.insert("epi".to_string(), PortValue::file("/raw/rest.nii.gz"));

    let outputs = stage
      .execute(&context(dir.path()), &serde_json::json!({}), &inputs)
      .await
      .unwrap();

    assert_eq!(
      outputs["epi_moco"],
      PortValue::file(dir.path().join("rest_realigned.nii.gz"))
    );

    let request: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(dir.path().join("request.json")).unwrap())
        .unwrap();
    assert_eq!(request["stage"], "moco");
    assert_eq!(request["branch"]["scan_id"], "a");
    assert_eq!(request["inputs"]["epi"]["file"], "/raw/rest.nii.gz");
  }

  #[tokio::test]
  async fn test_command_failure_captures_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let stage = CommandStage::new(descriptor(), shell("echo 'mcflirt: bad header' >&2; exit 3"));

    let err = stage
      .execute(&context(dir.path()), &serde_json::json!({}), &StageInputs::new())
      .await
      .unwrap_err();

    assert!(err.log().unwrap().contains("bad header"));
    assert!(!err.is_retryable());
    let persisted = std::fs::read_to_string(dir.path().join(STAGE_LOG_FILE)).unwrap();
    assert!(persisted.contains("bad header"));
  }

  #[tokio::test]
  async fn test_command_invalid_response() {
    let dir = tempfile::tempdir().unwrap();
    let stage = CommandStage::new(descriptor(), shell("echo not-json"));

    let err = stage
      .execute(&context(dir.path()), &serde_json::json!({}), &StageInputs::new())
      .await
      .unwrap_err();

    assert!(err.to_string().contains("invalid response"));
  }

  #[tokio::test]
  async fn test_command_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let stage = CommandStage::new(descriptor(), shell("sleep 30"));
    let ctx = context(dir.path());
    ctx.cancel.cancel();

    let err = stage
      .execute(&ctx, &serde_json::json!({}), &StageInputs::new())
      .await
      .unwrap_err();

    assert!(matches!(err, StageError::Cancelled));
  }
}
