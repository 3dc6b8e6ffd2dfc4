//! Wiring of the terminal sink node.

use std::path::Path;
use std::sync::Arc;

use restflow_sink::{OutputSink, SinkMapping, SinkStage, Substitution};
use restflow_stage::Stage;
use restflow_workflow::{WorkflowBuilder, WorkflowError};

use crate::error::PipelineError;

/// One artifact routed into the archive.
pub(crate) struct Publication<'a> {
  pub node: &'a str,
  pub stage: &'a Arc<dyn Stage>,
  pub port: &'a str,
  /// Directory below `preprocessed/func`, e.g. `pb01_moco/plots`.
  pub dest: &'a str,
  /// Append the `_scan_id_<scan>` branch segment.
  pub per_scan: bool,
}

/// A per-scan artifact.
pub(crate) fn publish<'a>(
  node: &'a str,
  stage: &'a Arc<dyn Stage>,
  port: &'a str,
  dest: &'a str,
) -> Publication<'a> {
  Publication {
    node,
    stage,
    port,
    dest,
    per_scan: true,
  }
}

/// An artifact shared by every scan of the subject.
pub(crate) fn publish_shared<'a>(
  node: &'a str,
  stage: &'a Arc<dyn Stage>,
  port: &'a str,
  dest: &'a str,
) -> Publication<'a> {
  Publication {
    per_scan: false,
    ..publish(node, stage, port, dest)
  }
}

impl Publication<'_> {
  fn sink_port(&self) -> String {
    format!("{}_{}", self.node, self.port)
  }

  fn destination(&self) -> String {
    if self.per_scan {
      format!("preprocessed/func/{}/_scan_id_{{scan_id}}", self.dest)
    } else {
      format!("preprocessed/func/{}", self.dest)
    }
  }
}

/// Add a sink node publishing every entry of `publications` under `root`.
pub(crate) fn add_sink(
  builder: &mut WorkflowBuilder,
  name: &str,
  root: &Path,
  substitutions: Vec<Substitution>,
  publications: &[Publication<'_>],
  retries: u32,
) -> Result<(), PipelineError> {
  let mut mapping = SinkMapping::new();
  for publication in publications {
    let port_type = publication
      .stage
      .describe()
      .output_port(publication.port)
      .map(|p| p.port_type)
      .ok_or_else(|| WorkflowError::UnknownPort {
        node: publication.node.to_string(),
        port: publication.port.to_string(),
      })?;
    mapping = mapping.route(publication.sink_port(), port_type, publication.destination());
  }
  mapping.substitutions = substitutions;

  let sink = SinkStage::new(name, OutputSink::new(root, mapping.substitutions.clone()), mapping)?;
  builder.add_node(name, Arc::new(sink))?;

  for publication in publications {
    builder.connect(publication.node, publication.port, name, &publication.sink_port())?;
  }
  builder.set_retries(name, retries)?;
  Ok(())
}
