//! Descriptors of the external processing tools.
//!
//! Each tool runs as a [`CommandStage`] whose program comes from the
//! `stages` section of the run configuration, keyed by descriptor name.

use std::sync::Arc;

use restflow_config::RunConfig;
use restflow_stage::{CommandStage, PortType, StageDescriptor, StageRegistry};
use serde_json::json;

use crate::PipelineKind;
use crate::error::PipelineError;

pub const REMOVE_VOL: &str = "remove_vol";
pub const MOCO: &str = "moco";
pub const FMAP_COREG: &str = "fmap_coreg";
pub const TRANSFORM_TS: &str = "transform_ts";
pub const DENOISE: &str = "denoise";
pub const APPLY_TRANSFORMS: &str = "apply_transforms";
pub const CHANGE_DATATYPE: &str = "change_datatype";

/// Drops the leading `t_min` volumes of a timeseries.
pub fn remove_vol() -> StageDescriptor {
  StageDescriptor::new(REMOVE_VOL)
    .input("in_file", PortType::Image)
    .input("t_min", PortType::Scalar)
    .output("out_file", PortType::Image)
}

/// Motion correction with realignment parameters, plots and tSNR.
pub fn moco() -> StageDescriptor {
  StageDescriptor::new(MOCO)
    .input("epi", PortType::Image)
    .output("epi_moco", PortType::Image)
    .output("par_moco", PortType::Text)
    .output("mat_moco", PortType::Transform)
    .output("rms_moco", PortType::Text)
    .output("epi_mean", PortType::Image)
    .output("rotplot", PortType::Plot)
    .output("transplot", PortType::Plot)
    .output("dispplots", PortType::Plot)
    .output("tsnr_file", PortType::Image)
    .with_config(json!({ "cost": "mutualinfo", "save_plots": true }))
}

/// Fieldmap unwarping and boundary-based coregistration to the anatomy.
///
/// Computes the transforms only; applying them is `transform_ts`.
pub fn fmap_coreg() -> StageDescriptor {
  StageDescriptor::new(FMAP_COREG)
    .input("epi_mean", PortType::Image)
    .input("phase", PortType::Image)
    .input("mag", PortType::Image)
    .input("anat_head", PortType::Image)
    .input("anat_brain", PortType::Image)
    .input("fs_subjects_dir", PortType::Scalar)
    .input("fs_subject_id", PortType::Scalar)
    .input("echo_space", PortType::Scalar)
    .input("te_diff", PortType::Scalar)
    .input("pe_dir", PortType::Scalar)
    .output("fmap", PortType::Image)
    .output("unwarpfield_epi2fmap", PortType::Transform)
    .output("unwarped_mean_epi2fmap", PortType::Image)
    .output("epi2fmap", PortType::Image)
    .output("shiftmap", PortType::Image)
    .output("fmap_fullwarp", PortType::Transform)
    .output("epi2anat", PortType::Image)
    .output("epi2anat_mat", PortType::Transform)
    .output("epi2anat_dat", PortType::Transform)
    .output("epi2anat_mincost", PortType::Text)
}

/// Applies motion, unwarping and coregistration in one resampling step.
pub fn transform_ts() -> StageDescriptor {
  StageDescriptor::new(TRANSFORM_TS)
    .input("orig_ts", PortType::Image)
    .input("anat_head", PortType::Image)
    .input("mat_moco", PortType::Transform)
    .input("fullwarp", PortType::Transform)
    .input("resolution", PortType::Scalar)
    .output("trans_ts", PortType::Image)
    .output("trans_ts_mean", PortType::Image)
    .output("resamp_brain", PortType::Image)
}

/// Nuisance regression, artefact detection, bandpass and normalization.
pub fn denoise() -> StageDescriptor {
  StageDescriptor::new(DENOISE)
    .input("epi_coreg", PortType::Image)
    .input("brain_mask", PortType::Image)
    .input("anat_brain", PortType::Image)
    .input("epi2anat_dat", PortType::Transform)
    .input("unwarped_mean", PortType::Image)
    .input("moco_par", PortType::Text)
    .input("highpass_sigma", PortType::Scalar)
    .input("lowpass_sigma", PortType::Scalar)
    .input("tr", PortType::Scalar)
    .output("wmcsf_mask", PortType::Image)
    .output("combined_motion", PortType::Text)
    .output("outlier_files", PortType::Text)
    .output("intensity_files", PortType::Text)
    .output("outlier_stats", PortType::Text)
    .output("outlier_plots", PortType::Plot)
    .output("mc_regressor", PortType::Text)
    .output("comp_regressor", PortType::Text)
    .output("mc_F", PortType::Image)
    .output("mc_pF", PortType::Image)
    .output("comp_F", PortType::Image)
    .output("comp_pF", PortType::Image)
    .output("brain_mask_resamp", PortType::Image)
    .output("brain_mask2epi", PortType::Image)
    .output("normalized_file", PortType::Image)
    .output("bandpassed_file", PortType::Image)
    .output("denoised_file", PortType::Image)
}

/// Warps an image through a transform list onto a reference grid.
pub fn apply_transforms() -> StageDescriptor {
  StageDescriptor::new(APPLY_TRANSFORMS)
    .input("input_image", PortType::Image)
    .input("transforms", PortType::Transform)
    .input("reference_image", PortType::Image)
    .output("output_image", PortType::Image)
    .with_config(json!({
      "input_image_type": 3,
      "interpolation": "BSpline",
      "invert_transform_flags": [false, false],
    }))
}

/// Casts an image to another voxel datatype.
pub fn change_datatype() -> StageDescriptor {
  StageDescriptor::new(CHANGE_DATATYPE)
    .input("in_file", PortType::Image)
    .output("out_file", PortType::Image)
    .with_config(json!({ "output_datatype": "float" }))
}

/// Tools a pipeline needs, in execution order.
pub fn tool_descriptors(kind: PipelineKind) -> Vec<StageDescriptor> {
  match kind {
    PipelineKind::Resting => vec![remove_vol(), moco(), fmap_coreg(), transform_ts(), denoise()],
    PipelineKind::Mni => vec![apply_transforms(), change_datatype()],
  }
}

/// Register a command stage for every tool of `kind`.
///
/// Fails with [`PipelineError::MissingStageCommand`] when the configuration
/// names no program for a required tool.
pub fn build_registry(kind: PipelineKind, config: &RunConfig) -> Result<StageRegistry, PipelineError> {
  let mut registry = StageRegistry::new();
  for descriptor in tool_descriptors(kind) {
    let command = config
      .stages
      .get(&descriptor.name)
      .cloned()
      .ok_or_else(|| PipelineError::MissingStageCommand(descriptor.name.clone()))?;
    registry.register(Arc::new(CommandStage::new(descriptor, command)))?;
  }
  Ok(registry)
}
