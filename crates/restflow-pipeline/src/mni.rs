//! Projection of the denoised resting series into MNI space.
//!
//! Reads what the resting pipeline archived, warps it through the subject's
//! `[warp, affine]` transform list onto the reference template and casts the
//! result to a compact datatype.

use std::sync::Arc;

use restflow_config::RunConfig;
use restflow_stage::{FileTemplate, Merge, PortType, PortValue, SelectFiles, Stage, StageRegistry};
use restflow_workflow::{Workflow, WorkflowBuilder};
use serde_json::json;
use tracing::debug;

use crate::archive::{add_sink, publish, publish_shared};
use crate::error::PipelineError;
use crate::resting::bind_subject;
use crate::stages::{APPLY_TRANSFORMS, CHANGE_DATATYPE};
use crate::subject::SubjectRun;

pub const WORKFLOW_NAME: &str = "mni";

const DENOISED_DIR: &str = "{out_dir}/preprocessed/func/pb04_denoise/data/_scan_id_{scan_id}";

/// One image warped to the template.
struct Projection {
  /// Suffix of the node names, e.g. `dbn` in `applytransform_dbn`.
  key: &'static str,
  interpolation: &'static str,
  datatype: &'static str,
  out_file: &'static str,
}

const GREY_MATTER: Projection = Projection {
  key: "gm",
  interpolation: "NearestNeighbor",
  datatype: "short",
  out_file: "gm_ribbon2mni.nii.gz",
};

const SERIES: [Projection; 3] = [
  Projection {
    key: "d",
    interpolation: "BSpline",
    datatype: "float",
    out_file: "rest_denoised2mni.nii.gz",
  },
  Projection {
    key: "db",
    interpolation: "BSpline",
    datatype: "float",
    out_file: "rest_denoised_bandpassed2mni.nii.gz",
  },
  Projection {
    key: "dbn",
    interpolation: "BSpline",
    datatype: "float",
    out_file: "rest_denoised_bandpassed_normed2mni.nii.gz",
  },
];

/// Add `applytransform_<key>` and `changedt_<key>` reading `source.port`.
/// Returns the name of the cast node.
fn add_projection(
  builder: &mut WorkflowBuilder,
  registry: &StageRegistry,
  projection: &Projection,
  source: &str,
  port: &str,
  template: &str,
) -> Result<String, PipelineError> {
  let warp = format!("applytransform_{}", projection.key);
  let cast = format!("changedt_{}", projection.key);

  builder.add_node(&warp, registry.get(APPLY_TRANSFORMS)?)?;
  builder.configure(&warp, json!({ "interpolation": projection.interpolation }))?;
  builder.set_input(&warp, "reference_image", PortValue::file(template))?;
  builder.connect(source, port, &warp, "input_image")?;
  builder.connect("translist", "out", &warp, "transforms")?;

  builder.add_node(&cast, registry.get(CHANGE_DATATYPE)?)?;
  builder.configure(
    &cast,
    json!({ "output_datatype": projection.datatype, "out_file": projection.out_file }),
  )?;
  builder.connect(&warp, "output_image", &cast, "in_file")?;

  Ok(cast)
}

pub fn mni_workflow(
  config: &RunConfig,
  run: &SubjectRun,
  registry: &StageRegistry,
) -> Result<Workflow, PipelineError> {
  let template = config
    .template
    .as_deref()
    .ok_or_else(|| PipelineError::MissingTemplate(WORKFLOW_NAME.to_string()))?;

  let mut builder = WorkflowBuilder::new(WORKFLOW_NAME);
  builder.declare_iterable("scan_id", config.scans.iter().cloned())?;

  let selectfiles: Arc<dyn Stage> = Arc::new(SelectFiles::new(
    "selectfiles",
    vec![
      FileTemplate::new(
        "rest_dbn",
        format!("{}/rest_denoised_bandpassed_norm.nii.gz", DENOISED_DIR),
        PortType::Image,
      ),
      FileTemplate::new(
        "rest_db",
        format!("{}/rest_denoised_bandpassed.nii.gz", DENOISED_DIR),
        PortType::Image,
      ),
      FileTemplate::new(
        "rest_d",
        format!("{}/rest_denoised.nii.gz", DENOISED_DIR),
        PortType::Image,
      ),
    ],
  ));
  builder.add_node("selectfiles", selectfiles.clone())?;
  bind_subject(&mut builder, "selectfiles", &selectfiles, run)?;
  builder.iterate("selectfiles", "scan_id", "scan_id")?;

  let anat_files: Arc<dyn Stage> = Arc::new(SelectFiles::new(
    "anat_files",
    vec![
      FileTemplate::new(
        "gm",
        "{out_dir}/preprocessed/anat/gm.nii.gz",
        PortType::Image,
      ),
      FileTemplate::new(
        "affine",
        "{out_dir}/preprocessed/anat/transforms2mni/transform0GenericAffine.mat",
        PortType::Transform,
      ),
      FileTemplate::new(
        "warp",
        "{out_dir}/preprocessed/anat/transforms2mni/transform1Warp.nii.gz",
        PortType::Transform,
      ),
    ],
  ));
  builder.add_node("anat_files", anat_files.clone())?;
  bind_subject(&mut builder, "anat_files", &anat_files, run)?;

  builder.add_node("translist", Arc::new(Merge::new("translist", 2, PortType::Transform)))?;
  builder.connect_many("anat_files", "translist", &[("warp", "in1"), ("affine", "in2")])?;

  let change_datatype = registry.get(CHANGE_DATATYPE)?;

  let grey_matter = add_projection(&mut builder, registry, &GREY_MATTER, "anat_files", "gm", template)?;
  add_sink(
    &mut builder,
    "sink_gm",
    &run.out_dir,
    Vec::new(),
    &[publish_shared(&grey_matter, &change_datatype, "out_file", "pb05_mni")],
    config.execution.sink_retries,
  )?;

  let mut series = Vec::with_capacity(SERIES.len());
  for projection in &SERIES {
    let port = format!("rest_{}", projection.key);
    series.push(add_projection(&mut builder, registry, projection, "selectfiles", &port, template)?);
  }
  let publications: Vec<_> = series
    .iter()
    .map(|cast| publish(cast, &change_datatype, "out_file", "pb05_mni"))
    .collect();
  add_sink(
    &mut builder,
    "sink",
    &run.out_dir,
    Vec::new(),
    &publications,
    config.execution.sink_retries,
  )?;

  debug!(subject = %run.subject, template, "wiring mni projection");

  Ok(builder.build(&run.working_dir)?)
}
