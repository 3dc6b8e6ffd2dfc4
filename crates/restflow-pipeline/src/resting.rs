//! Resting-state preprocessing of one subject.
//!
//! Per scan: discard the leading volumes, motion-correct, compute the
//! fieldmap unwarping and coregistration, resample the series in one step
//! and denoise it. The anatomical inputs are shared by every scan.

use std::sync::Arc;

use restflow_config::{RunConfig, SinkVerbosity};
use restflow_resolver::ScanProtocol;
use restflow_sink::Substitution;
use restflow_stage::{
  FieldmapInfo, FileTemplate, PortType, PortValue, SelectFiles, Stage, StageRegistry,
};
use restflow_workflow::{Workflow, WorkflowBuilder};
use tracing::debug;

use crate::archive::{add_sink, publish};
use crate::error::PipelineError;
use crate::stages::{DENOISE, FMAP_COREG, MOCO, REMOVE_VOL, TRANSFORM_TS};
use crate::subject::SubjectRun;

pub const WORKFLOW_NAME: &str = "lsd_resting";

/// Tool outputs named after the input series get friendlier archive names.
pub fn rename_table() -> Vec<Substitution> {
  vec![
    Substitution::new("rest_realigned.nii.gz_abs.rms", "rest_realigned_abs.rms"),
    Substitution::new("rest_realigned.nii.gz.par", "rest_realigned.par"),
    Substitution::new("rest_realigned.nii.gz_rel.rms", "rest_realigned_rel.rms"),
    Substitution::new("rest_realigned.nii.gz_abs_disp", "abs_displacement_plot"),
    Substitution::new("rest_realigned.nii.gz_rel_disp", "rel_displacment_plot"),
    Substitution::new("rest2anat_denoised.nii.gz", "rest_denoised.nii.gz"),
  ]
}

/// The configured protocol table, or the built-in one.
pub fn scan_protocol(config: &RunConfig) -> Result<ScanProtocol, PipelineError> {
  match &config.protocol {
    Some(entries) => Ok(ScanProtocol::from_entries(entries.iter().map(|(scan, entry)| {
      (
        scan.as_str(),
        entry.fieldmap_id.as_str(),
        entry.phase_encoding.as_str(),
      )
    }))?),
    None => Ok(ScanProtocol::lsd_resting()),
  }
}

/// Bind every scalar input of a file selector that the subject knows about.
pub(crate) fn bind_subject(
  builder: &mut WorkflowBuilder,
  node: &str,
  stage: &Arc<dyn Stage>,
  run: &SubjectRun,
) -> Result<(), PipelineError> {
  let bindings = run.bindings();
  for port in &stage.describe().inputs {
    if let Some(value) = bindings.get(&port.name) {
      builder.set_input(node, &port.name, PortValue::scalar(value.clone()))?;
    }
  }
  Ok(())
}

pub fn resting_workflow(
  config: &RunConfig,
  run: &SubjectRun,
  registry: &StageRegistry,
) -> Result<Workflow, PipelineError> {
  let protocol = scan_protocol(config)?;
  protocol.validate(&config.scans)?;

  let acquisition = &config.acquisition;
  let mut builder = WorkflowBuilder::new(WORKFLOW_NAME);
  builder.declare_iterable("scan_id", config.scans.iter().cloned())?;

  // inputs
  let fmap_info: Arc<dyn Stage> = Arc::new(FieldmapInfo::new("fmap_info", protocol));
  builder.add_node("fmap_info", fmap_info)?;
  builder.iterate("fmap_info", "scan_id", "scan_id")?;

  let selectfiles: Arc<dyn Stage> = Arc::new(SelectFiles::new(
    "selectfiles",
    vec![
      FileTemplate::new(
        "func",
        "{data_dir}/ses-02/func/{subject}_{scan_id}.nii.gz",
        PortType::Image,
      ),
      FileTemplate::new(
        "fmap_phase",
        "{data_dir}/ses-02/fmap/{subject}_{fmap_id}_phasediff.nii.gz",
        PortType::Image,
      ),
      FileTemplate::new(
        "fmap_mag",
        "{data_dir}/ses-02/fmap/{subject}_{fmap_id}_magnitude2.nii.gz",
        PortType::Image,
      ),
    ],
  ));
  builder.add_node("selectfiles", selectfiles.clone())?;
  bind_subject(&mut builder, "selectfiles", &selectfiles, run)?;
  builder.iterate("selectfiles", "scan_id", "scan_id")?;
  builder.connect("fmap_info", "fmap_id", "selectfiles", "fmap_id")?;

  let anat_files: Arc<dyn Stage> = Arc::new(SelectFiles::new(
    "anat_files",
    vec![
      FileTemplate::new(
        "anat_head",
        "{out_dir}/preprocessed/anat/T1.nii.gz",
        PortType::Image,
      ),
      FileTemplate::new(
        "anat_brain",
        "{out_dir}/preprocessed/anat/T1_brain.nii.gz",
        PortType::Image,
      ),
      FileTemplate::new(
        "func_mask",
        "{out_dir}/preprocessed/anat/func_mask.nii.gz",
        PortType::Image,
      ),
    ],
  ));
  builder.add_node("anat_files", anat_files.clone())?;
  bind_subject(&mut builder, "anat_files", &anat_files, run)?;

  // volume removal and motion correction
  let remove_vol = registry.get(REMOVE_VOL)?;
  builder.add_node("remove_vol", remove_vol.clone())?;
  builder.set_input("remove_vol", "t_min", PortValue::scalar(acquisition.vol_to_remove))?;
  builder.connect("selectfiles", "func", "remove_vol", "in_file")?;

  let moco = registry.get(MOCO)?;
  builder.add_node("moco", moco.clone())?;
  builder.connect("remove_vol", "out_file", "moco", "epi")?;

  // fieldmap and coregistration transforms
  let fmap_coreg = registry.get(FMAP_COREG)?;
  builder.add_node("fmap_coreg", fmap_coreg.clone())?;
  builder.set_input(
    "fmap_coreg",
    "fs_subjects_dir",
    PortValue::scalar(run.freesurfer_dir.display().to_string()),
  )?;
  builder.set_input("fmap_coreg", "fs_subject_id", PortValue::scalar(run.subject.clone()))?;
  builder.set_input("fmap_coreg", "echo_space", PortValue::scalar(acquisition.echo_space))?;
  builder.set_input("fmap_coreg", "te_diff", PortValue::scalar(acquisition.te_diff))?;
  builder.connect("fmap_info", "pe_dir", "fmap_coreg", "pe_dir")?;
  builder.connect_many(
    "selectfiles",
    "fmap_coreg",
    &[("fmap_phase", "phase"), ("fmap_mag", "mag")],
  )?;
  builder.connect_many(
    "anat_files",
    "fmap_coreg",
    &[("anat_head", "anat_head"), ("anat_brain", "anat_brain")],
  )?;
  builder.connect("moco", "epi_mean", "fmap_coreg", "epi_mean")?;

  // single-step resampling
  let transform_ts = registry.get(TRANSFORM_TS)?;
  builder.add_node("transform_ts", transform_ts.clone())?;
  builder.set_input(
    "transform_ts",
    "resolution",
    PortValue::scalar(acquisition.epi_resolution),
  )?;
  builder.connect("remove_vol", "out_file", "transform_ts", "orig_ts")?;
  builder.connect("anat_files", "anat_head", "transform_ts", "anat_head")?;
  builder.connect("moco", "mat_moco", "transform_ts", "mat_moco")?;
  builder.connect("fmap_coreg", "fmap_fullwarp", "transform_ts", "fullwarp")?;

  // denoising
  let denoise = registry.get(DENOISE)?;
  builder.add_node("denoise", denoise.clone())?;
  builder.set_input(
    "denoise",
    "highpass_sigma",
    PortValue::scalar(acquisition.highpass_sigma()),
  )?;
  builder.set_input(
    "denoise",
    "lowpass_sigma",
    PortValue::scalar(acquisition.lowpass_sigma()),
  )?;
  builder.set_input("denoise", "tr", PortValue::scalar(acquisition.tr))?;
  builder.connect_many(
    "anat_files",
    "denoise",
    &[("func_mask", "brain_mask"), ("anat_brain", "anat_brain")],
  )?;
  builder.connect_many(
    "fmap_coreg",
    "denoise",
    &[
      ("epi2anat_dat", "epi2anat_dat"),
      ("unwarped_mean_epi2fmap", "unwarped_mean"),
    ],
  )?;
  builder.connect("moco", "par_moco", "denoise", "moco_par")?;
  builder.connect("transform_ts", "trans_ts", "denoise", "epi_coreg")?;

  // archive
  let mut publications = vec![
    publish("moco", &moco, "epi_moco", "pb01_moco"),
    publish("moco", &moco, "par_moco", "pb01_moco"),
    publish("moco", &moco, "rms_moco", "pb01_moco"),
    publish("moco", &moco, "epi_mean", "pb01_moco"),
    publish("moco", &moco, "rotplot", "pb01_moco/plots"),
    publish("moco", &moco, "transplot", "pb01_moco/plots"),
    publish("moco", &moco, "dispplots", "pb01_moco/plots"),
    publish("moco", &moco, "tsnr_file", "pb01_moco"),
    publish("fmap_coreg", &fmap_coreg, "epi2anat", "pb02_fmap"),
    publish("fmap_coreg", &fmap_coreg, "epi2anat_mat", "pb02_fmap/transforms2anat"),
    publish("fmap_coreg", &fmap_coreg, "epi2anat_dat", "pb02_fmap/transforms2anat"),
    publish("transform_ts", &transform_ts, "trans_ts", "pb03_coregister"),
    publish("transform_ts", &transform_ts, "trans_ts_mean", "pb03_coregister"),
    publish("transform_ts", &transform_ts, "resamp_brain", "pb03_coregister"),
    publish("denoise", &denoise, "wmcsf_mask", "pb04_denoise/mask"),
    publish("denoise", &denoise, "combined_motion", "pb04_denoise/artefact"),
    publish("denoise", &denoise, "outlier_files", "pb04_denoise/artefact"),
    publish("denoise", &denoise, "intensity_files", "pb04_denoise/artefact"),
    publish("denoise", &denoise, "outlier_stats", "pb04_denoise/artefact"),
    publish("denoise", &denoise, "outlier_plots", "pb04_denoise/artefact"),
    publish("denoise", &denoise, "mc_regressor", "pb04_denoise/regress"),
    publish("denoise", &denoise, "comp_regressor", "pb04_denoise/regress"),
    publish("denoise", &denoise, "mc_F", "pb04_denoise/regress"),
    publish("denoise", &denoise, "mc_pF", "pb04_denoise/regress"),
    publish("denoise", &denoise, "comp_F", "pb04_denoise/regress"),
    publish("denoise", &denoise, "comp_pF", "pb04_denoise/regress"),
    publish("denoise", &denoise, "brain_mask_resamp", "pb04_denoise/mask"),
    publish("denoise", &denoise, "brain_mask2epi", "pb04_denoise/mask"),
    publish("denoise", &denoise, "normalized_file", "pb04_denoise/data"),
    publish("denoise", &denoise, "bandpassed_file", "pb04_denoise/data"),
    publish("denoise", &denoise, "denoised_file", "pb04_denoise/data"),
  ];

  if config.execution.verbosity == SinkVerbosity::Full {
    publications.extend([
      publish("remove_vol", &remove_vol, "out_file", "pb00_discard"),
      publish("fmap_coreg", &fmap_coreg, "fmap", "pb02_fmap/transforms2anat"),
      publish("fmap_coreg", &fmap_coreg, "unwarpfield_epi2fmap", "pb02_fmap"),
      publish("fmap_coreg", &fmap_coreg, "unwarped_mean_epi2fmap", "pb02_fmap"),
      publish("fmap_coreg", &fmap_coreg, "epi2fmap", "pb02_fmap"),
      publish("fmap_coreg", &fmap_coreg, "shiftmap", "pb02_fmap"),
      publish("fmap_coreg", &fmap_coreg, "fmap_fullwarp", "pb02_fmap/transforms2anat"),
      publish("fmap_coreg", &fmap_coreg, "epi2anat_mincost", "pb02_fmap"),
    ]);
  }

  debug!(
    subject = %run.subject,
    routes = publications.len(),
    verbosity = ?config.execution.verbosity,
    "wiring resting sink"
  );
  add_sink(
    &mut builder,
    "sink",
    &run.out_dir,
    rename_table(),
    &publications,
    config.execution.sink_retries,
  )?;

  Ok(builder.build(&run.working_dir)?)
}
