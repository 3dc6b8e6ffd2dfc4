use restflow_resolver::ResolveError;
use restflow_runtime::RuntimeError;
use restflow_sink::SinkError;
use restflow_stage::RegistryError;
use restflow_workflow::WorkflowError;
use thiserror::Error;

/// Errors raised while assembling or running a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Workflow(#[from] WorkflowError),

  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error(transparent)]
  Sink(#[from] SinkError),

  #[error(transparent)]
  Runtime(#[from] RuntimeError),

  #[error("no command configured for stage '{0}'")]
  MissingStageCommand(String),

  #[error("pipeline '{0}' requires a reference template")]
  MissingTemplate(String),

  #[error("unknown pipeline '{0}' (expected 'resting' or 'mni')")]
  UnknownPipeline(String),
}
