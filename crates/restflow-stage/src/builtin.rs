//! In-process stages used for wiring rather than image processing.

use std::path::PathBuf;

use async_trait::async_trait;
use restflow_resolver::{Bindings, ScanProtocol, placeholders, render};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::descriptor::StageDescriptor;
use crate::error::StageError;
use crate::port::{PortType, PortValue};
use crate::stage::{Stage, StageContext, StageInputs, StageOutputs};

/// A named file template, e.g. `func = {data_dir}/ses-02/func/{subject}_{scan_id}.nii.gz`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTemplate {
  pub name: String,
  pub template: String,
  pub port_type: PortType,
}

impl FileTemplate {
  pub fn new(name: impl Into<String>, template: impl Into<String>, port_type: PortType) -> Self {
    Self {
      name: name.into(),
      template: template.into(),
      port_type,
    }
  }
}

/// Renders file templates into paths.
///
/// Every placeholder used by the templates becomes a scalar input port; every
/// template becomes an output port. Paths are not checked for existence.
pub struct SelectFiles {
  descriptor: StageDescriptor,
  templates: Vec<FileTemplate>,
}

impl SelectFiles {
  pub fn new(name: impl Into<String>, templates: Vec<FileTemplate>) -> Self {
    let mut descriptor = StageDescriptor::new(name).with_config(json!({ "templates": templates }));

    let mut seen: Vec<String> = Vec::new();
    for template in &templates {
      for placeholder in placeholders(&template.template) {
        if !seen.contains(&placeholder) {
          descriptor = descriptor.input(placeholder.clone(), PortType::Scalar);
          seen.push(placeholder);
        }
      }
    }
    for template in &templates {
      descriptor = descriptor.output(template.name.clone(), template.port_type);
    }

    Self {
      descriptor,
      templates,
    }
  }
}

#[async_trait]
impl Stage for SelectFiles {
  fn describe(&self) -> &StageDescriptor {
    &self.descriptor
  }

  async fn execute(
    &self,
    _ctx: &StageContext,
    _config: &serde_json::Value,
    inputs: &StageInputs,
  ) -> Result<StageOutputs, StageError> {
    let mut bindings = Bindings::new();
    for (port, value) in inputs {
      let value = value
        .scalar_string()
        .ok_or_else(|| StageError::failed(format!("input '{}' is not a scalar", port)))?;
      bindings.insert(port.clone(), value);
    }

    let mut outputs = StageOutputs::new();
    for template in &self.templates {
      let rendered =
        render(&template.template, &bindings).map_err(|e| StageError::failed(e.to_string()))?;
      outputs.insert(template.name.clone(), PortValue::File(PathBuf::from(rendered)));
    }
    Ok(outputs)
  }
}

/// Looks up fieldmap id and phase-encode polarity of a scan.
///
/// Input `scan_id`; outputs `fmap_id` and `pe_dir` (`"y"` or `"y-"`).
pub struct FieldmapInfo {
  descriptor: StageDescriptor,
  protocol: ScanProtocol,
}

impl FieldmapInfo {
  pub fn new(name: impl Into<String>, protocol: ScanProtocol) -> Self {
    let descriptor = StageDescriptor::new(name)
      .input("scan_id", PortType::Scalar)
      .output("fmap_id", PortType::Scalar)
      .output("pe_dir", PortType::Scalar)
      .with_config(json!({ "protocol": protocol }));
    Self {
      descriptor,
      protocol,
    }
  }
}

#[async_trait]
impl Stage for FieldmapInfo {
  fn describe(&self) -> &StageDescriptor {
    &self.descriptor
  }

  async fn execute(
    &self,
    _ctx: &StageContext,
    _config: &serde_json::Value,
    inputs: &StageInputs,
  ) -> Result<StageOutputs, StageError> {
    let scan_id = inputs
      .get("scan_id")
      .and_then(PortValue::scalar_string)
      .ok_or_else(|| StageError::failed("missing scalar input 'scan_id'"))?;

    let meta = self
      .protocol
      .resolve(&scan_id)
      .map_err(|e| StageError::failed(e.to_string()))?;

    let mut outputs = StageOutputs::new();
    outputs.insert("fmap_id".to_string(), PortValue::scalar(meta.fieldmap_id.clone()));
    outputs.insert("pe_dir".to_string(), PortValue::scalar(meta.phase_encoding.as_str()));
    Ok(outputs)
  }
}

/// Concatenates `in1..inN` into one list on `out`, in port order.
pub struct Merge {
  descriptor: StageDescriptor,
  count: usize,
}

impl Merge {
  pub fn new(name: impl Into<String>, count: usize, port_type: PortType) -> Self {
    let mut descriptor = StageDescriptor::new(name).with_config(json!({ "count": count }));
    for i in 1..=count {
      descriptor = descriptor.input(format!("in{}", i), port_type);
    }
    descriptor = descriptor.output("out", port_type);
    Self { descriptor, count }
  }
}

#[async_trait]
impl Stage for Merge {
  fn describe(&self) -> &StageDescriptor {
    &self.descriptor
  }

  async fn execute(
    &self,
    _ctx: &StageContext,
    _config: &serde_json::Value,
    inputs: &StageInputs,
  ) -> Result<StageOutputs, StageError> {
    let mut merged = Vec::new();
    for i in 1..=self.count {
      let port = format!("in{}", i);
      let value = inputs
        .get(&port)
        .ok_or_else(|| StageError::failed(format!("missing input '{}'", port)))?;
      merged.extend(value.paths().into_iter().map(|p| p.to_path_buf()));
    }

    let mut outputs = StageOutputs::new();
    outputs.insert("out".to_string(), PortValue::Files(merged));
    Ok(outputs)
  }
}
