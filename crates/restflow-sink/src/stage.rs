use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use restflow_stage::{
  PortType, PortValue, Stage, StageContext, StageDescriptor, StageError, StageInputs, StageOutputs,
};
use serde_json::json;
use tracing::info;

use crate::error::SinkError;
use crate::mapping::SinkMapping;
use crate::sink::OutputSink;

/// Terminal graph node publishing each routed input.
///
/// Every route becomes an input port and an output port of the same name;
/// the outputs carry the published archive paths.
pub struct SinkStage {
  descriptor: StageDescriptor,
  sink: OutputSink,
  mapping: SinkMapping,
}

impl SinkStage {
  pub fn new(name: impl Into<String>, sink: OutputSink, mapping: SinkMapping) -> Result<Self, SinkError> {
    let mut descriptor = StageDescriptor::new(name).with_config(json!({
      "root": sink.root().display().to_string(),
      "routes": mapping.routes,
      "substitutions": mapping.substitutions,
    }));

    for (i, route) in mapping.routes.iter().enumerate() {
      if route.port_type == PortType::Scalar {
        return Err(SinkError::UnsupportedPort(route.port.clone()));
      }
      if mapping.routes[..i].iter().any(|r| r.port == route.port) {
        return Err(SinkError::DuplicateRoute(route.port.clone()));
      }
      descriptor = descriptor
        .input(route.port.clone(), route.port_type)
        .output(route.port.clone(), route.port_type);
    }

    Ok(Self {
      descriptor,
      sink,
      mapping,
    })
  }
}

impl SinkStage {
  /// Fail when two files of one list would land on the same archive path
  /// after renaming. Nothing is copied in that case.
  fn check_distinct_targets(&self, ctx: &StageContext, destination: &str, paths: &[PathBuf]) -> Result<(), SinkError> {
    let mut seen: HashMap<PathBuf, &PathBuf> = HashMap::with_capacity(paths.len());
    for path in paths {
      let target = self.sink.destination(&ctx.branch, destination, path)?;
      if let Some(earlier) = seen.get(&target) {
        return Err(SinkError::Write {
          from: path.clone(),
          source: io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("'{}' is published to the same path", earlier.display()),
          ),
          to: target,
        });
      }
      seen.insert(target, path);
    }
    Ok(())
  }
}

fn to_stage_error(err: SinkError) -> StageError {
  match err {
    SinkError::Write { to, source, .. } => StageError::SinkWrite { path: to, source },
    other => StageError::failed(other.to_string()),
  }
}

#[async_trait]
impl Stage for SinkStage {
  fn describe(&self) -> &StageDescriptor {
    &self.descriptor
  }

  async fn execute(
    &self,
    ctx: &StageContext,
    _config: &serde_json::Value,
    inputs: &StageInputs,
  ) -> Result<StageOutputs, StageError> {
    let mut outputs = StageOutputs::new();

    for route in &self.mapping.routes {
      if ctx.cancel.is_cancelled() {
        return Err(StageError::Cancelled);
      }
      let Some(value) = inputs.get(&route.port) else {
        return Err(StageError::failed(format!("missing sink input '{}'", route.port)));
      };

      let published = match value {
        PortValue::File(path) => PortValue::File(
          self
            .sink
            .publish(&ctx.branch, &route.destination, path)
            .await
            .map_err(to_stage_error)?,
        ),
        PortValue::Files(paths) => {
          self
            .check_distinct_targets(ctx, &route.destination, paths)
            .map_err(to_stage_error)?;
          let mut targets = Vec::with_capacity(paths.len());
          for path in paths {
            targets.push(
              self
                .sink
                .publish(&ctx.branch, &route.destination, path)
                .await
                .map_err(to_stage_error)?,
            );
          }
          PortValue::Files(targets)
        }
        PortValue::Scalar(_) => {
          return Err(StageError::failed(format!(
            "sink input '{}' received a scalar",
            route.port
          )));
        }
      };
      outputs.insert(route.port.clone(), published);
    }

    info!(address = %ctx.address, count = outputs.len(), "published outputs");
    Ok(outputs)
  }
}
