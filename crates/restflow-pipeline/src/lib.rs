//! Restflow Pipeline
//!
//! Concrete workflows built on the restflow engine:
//!
//! - [`PipelineKind::Resting`] preprocesses the resting-state scans of one
//!   subject, one branch per scan, and archives the results.
//! - [`PipelineKind::Mni`] projects the archived series into MNI space.
//!
//! External tools are [`restflow_stage::CommandStage`]s whose programs come
//! from the run configuration; see [`stages`].

mod archive;
mod error;
pub mod mni;
pub mod resting;
pub mod stages;
mod subject;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use restflow_config::RunConfig;
use restflow_runtime::{RunNotifier, RunSummary, Runner, RunnerConfig};
use restflow_stage::StageRegistry;
use restflow_workflow::Workflow;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

pub use error::PipelineError;
pub use stages::build_registry;
pub use subject::SubjectRun;

/// The workflows this crate knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
  Resting,
  Mni,
}

impl PipelineKind {
  /// Name of the workflow directory below the working directory.
  pub fn workflow_name(&self) -> &'static str {
    match self {
      PipelineKind::Resting => resting::WORKFLOW_NAME,
      PipelineKind::Mni => mni::WORKFLOW_NAME,
    }
  }
}

impl fmt::Display for PipelineKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PipelineKind::Resting => write!(f, "resting"),
      PipelineKind::Mni => write!(f, "mni"),
    }
  }
}

impl FromStr for PipelineKind {
  type Err = PipelineError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "resting" => Ok(PipelineKind::Resting),
      "mni" => Ok(PipelineKind::Mni),
      other => Err(PipelineError::UnknownPipeline(other.to_string())),
    }
  }
}

/// Build the expanded workflow of `kind` for one subject.
pub fn build_workflow(
  kind: PipelineKind,
  config: &RunConfig,
  run: &SubjectRun,
  registry: &StageRegistry,
) -> Result<Workflow, PipelineError> {
  match kind {
    PipelineKind::Resting => resting::resting_workflow(config, run, registry),
    PipelineKind::Mni => mni::mni_workflow(config, run, registry),
  }
}

/// Scheduler settings of one subject run.
pub fn runner_config(config: &RunConfig, run: &SubjectRun) -> RunnerConfig {
  RunnerConfig {
    max_concurrency: config.execution.max_concurrency,
    reclaim_work_dirs: config.execution.reclaim_work_dirs,
    use_cache: config.execution.use_cache,
    crash_dir: Some(run.crash_dir.clone()),
  }
}

/// Build and run `kind` for one subject.
///
/// Construction errors abort before any stage executes. Stage failures do
/// not; they are reported in the returned summary.
#[instrument(skip(config, notifier, cancel), fields(pipeline = %kind))]
pub async fn run_subject(
  kind: PipelineKind,
  config: &RunConfig,
  subject: &str,
  notifier: Arc<dyn RunNotifier>,
  cancel: CancellationToken,
) -> Result<RunSummary, PipelineError> {
  let run = SubjectRun::new(config, subject)?;
  let registry = build_registry(kind, config)?;
  let workflow = build_workflow(kind, config, &run, &registry)?;

  info!(
    subject = %run.subject,
    nodes = workflow.nodes().len(),
    branches = workflow.branches().len(),
    working_dir = %run.working_dir.display(),
    "workflow built"
  );

  let runner = Runner::new(Arc::new(workflow), runner_config(config, &run)).with_notifier(notifier);
  let summary = runner.run(cancel).await?;
  summary.log();
  Ok(summary)
}
