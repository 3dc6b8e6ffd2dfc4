use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use restflow_config::{RunConfig, SinkVerbosity};
use restflow_pipeline::stages::tool_descriptors;
use restflow_pipeline::{PipelineError, PipelineKind, SubjectRun, build_workflow, runner_config};
use restflow_resolver::ResolveError;
use restflow_runtime::Runner;
use restflow_stage::{
  BranchKey, PortValue, Stage, StageContext, StageDescriptor, StageError, StageInputs,
  StageOutputs, StageRegistry,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const SUBJECT: &str = "sub-010100";
const AP: &str = "ses-02_task-rest_acq-AP_run-01_bold";
const PA: &str = "ses-02_task-rest_acq-PA_run-01_bold";
const FMAP: &str = "ses-02_acq-GEfmap_run-01";

/// One recorded tool invocation.
#[derive(Debug, Clone)]
struct Call {
  tool: String,
  branch: BranchKey,
  config: Value,
  inputs: StageInputs,
}

/// Stands in for an external tool: writes every declared file output into
/// its working directory and echoes scalar outputs.
struct Tool {
  descriptor: StageDescriptor,
  calls: Arc<Mutex<Vec<Call>>>,
}

/// File name a tool would give the artifact of `port`.
fn artifact_name(port: &str, config: &Value) -> String {
  match port {
    "par_moco" => "rest_realigned.nii.gz.par".to_string(),
    "rms_moco" => "rest_realigned.nii.gz_abs.rms".to_string(),
    "denoised_file" => "rest2anat_denoised.nii.gz".to_string(),
    "out_file" => match config.get("out_file").and_then(Value::as_str) {
      Some(name) => name.to_string(),
      None => "out_file.nii.gz".to_string(),
    },
    other => format!("{}.nii.gz", other),
  }
}

#[async_trait]
impl Stage for Tool {
  fn describe(&self) -> &StageDescriptor {
    &self.descriptor
  }

  async fn execute(
    &self,
    ctx: &StageContext,
    config: &Value,
    inputs: &StageInputs,
  ) -> Result<StageOutputs, StageError> {
    self.calls.lock().unwrap().push(Call {
      tool: self.descriptor.name.clone(),
      branch: ctx.branch.clone(),
      config: config.clone(),
      inputs: inputs.clone(),
    });

    let mut outputs = StageOutputs::new();
    for port in &self.descriptor.outputs {
      if !port.port_type.is_file() {
        outputs.insert(port.name.clone(), PortValue::scalar(port.name.clone()));
        continue;
      }
      let path = ctx.work_dir.join(artifact_name(&port.name, config));
      tokio::fs::write(&path, port.name.as_bytes())
        .await
        .map_err(|e| StageError::failed(e.to_string()))?;
      outputs.insert(port.name.clone(), PortValue::file(path));
    }
    Ok(outputs)
  }
}

fn fake_registry(kind: PipelineKind, calls: &Arc<Mutex<Vec<Call>>>) -> StageRegistry {
  let mut registry = StageRegistry::new();
  for descriptor in tool_descriptors(kind) {
    registry
      .register(Arc::new(Tool {
        descriptor,
        calls: calls.clone(),
      }))
      .unwrap();
  }
  registry
}

fn config(root: &Path, scans: &[&str]) -> RunConfig {
  serde_json::from_value(json!({
    "working_dir": root.join("work/{subject}"),
    "out_dir": root.join("out/{subject}"),
    "data_dir": root.join("raw/{subject}"),
    "freesurfer_dir": root.join("freesurfer"),
    "template": root.join("MNI152_T1_2mm_brain.nii.gz"),
    "acquisition": {
      "echo_space": 0.00067, "te_diff": 2.46, "epi_resolution": 2.3,
      "tr": 1.4, "highpass": 0.01, "lowpass": 0.1, "vol_to_remove": 5
    },
    "scans": scans,
    "execution": { "max_concurrency": 3 }
  }))
  .unwrap()
}

fn touch(path: PathBuf) {
  std::fs::create_dir_all(path.parent().unwrap()).unwrap();
  std::fs::write(path, b"nifti").unwrap();
}

fn branch(scan: &str) -> BranchKey {
  BranchKey::constant().with("scan_id", scan)
}

fn calls_of(calls: &Arc<Mutex<Vec<Call>>>, tool: &str) -> Vec<Call> {
  calls
    .lock()
    .unwrap()
    .iter()
    .filter(|c| c.tool == tool)
    .cloned()
    .collect()
}

fn scalar(call: &Call, port: &str) -> String {
  call.inputs[port].scalar_string().unwrap()
}

#[tokio::test]
async fn test_resting_pipeline_end_to_end() {
  let root = TempDir::new().unwrap();
  let config = config(root.path(), &[AP, PA]);
  let run = SubjectRun::new(&config, SUBJECT).unwrap();

  for scan in [AP, PA] {
    touch(run.data_dir.join(format!("ses-02/func/{}_{}.nii.gz", SUBJECT, scan)));
  }
  touch(run.data_dir.join(format!("ses-02/fmap/{}_{}_phasediff.nii.gz", SUBJECT, FMAP)));
  touch(run.data_dir.join(format!("ses-02/fmap/{}_{}_magnitude2.nii.gz", SUBJECT, FMAP)));
  for anat in ["T1.nii.gz", "T1_brain.nii.gz", "func_mask.nii.gz"] {
    touch(run.out_dir.join("preprocessed/anat").join(anat));
  }

  let calls = Arc::new(Mutex::new(Vec::new()));
  let registry = fake_registry(PipelineKind::Resting, &calls);
  let workflow = build_workflow(PipelineKind::Resting, &config, &run, &registry).unwrap();

  // anat_files plus eight nodes per scan.
  assert_eq!(workflow.nodes().len(), 17);
  assert_eq!(workflow.branches(), vec![branch(AP), branch(PA)]);

  let summary = Runner::new(Arc::new(workflow), runner_config(&config, &run))
    .run(CancellationToken::new())
    .await
    .unwrap();

  assert!(summary.is_success(), "failed nodes: {:?}", summary.failed().collect::<Vec<_>>());
  assert_eq!(summary.executed, 17);

  let func = run.out_dir.join("preprocessed/func");
  for scan in [AP, PA] {
    let segment = format!("_scan_id_{}", scan);
    assert!(func.join("pb01_moco").join(&segment).join("rest_realigned.par").exists());
    assert!(func.join("pb01_moco").join(&segment).join("rest_realigned_abs.rms").exists());
    assert!(func.join("pb01_moco/plots").join(&segment).join("rotplot.nii.gz").exists());
    assert!(func.join("pb02_fmap/transforms2anat").join(&segment).join("epi2anat_dat.nii.gz").exists());
    assert!(func.join("pb03_coregister").join(&segment).join("trans_ts.nii.gz").exists());
    assert!(func.join("pb04_denoise/data").join(&segment).join("rest_denoised.nii.gz").exists());
    assert!(!func.join("pb04_denoise/data").join(&segment).join("rest2anat_denoised.nii.gz").exists());
  }
  assert!(!func.join("pb00_discard").exists());

  let fmap_coreg = calls_of(&calls, "fmap_coreg");
  assert_eq!(fmap_coreg.len(), 2);
  for call in &fmap_coreg {
    let expected = if call.branch == branch(AP) { "y-" } else { "y" };
    assert_eq!(scalar(call, "pe_dir"), expected);
    assert_eq!(scalar(call, "fs_subject_id"), SUBJECT);
  }

  let remove_vol = calls_of(&calls, "remove_vol");
  let ap = remove_vol.iter().find(|c| c.branch == branch(AP)).unwrap();
  assert_eq!(ap.inputs["t_min"], PortValue::scalar(5));
  assert_eq!(
    ap.inputs["in_file"],
    PortValue::file(run.data_dir.join(format!("ses-02/func/{}_{}.nii.gz", SUBJECT, AP)))
  );

  let denoise = &calls_of(&calls, "denoise")[0];
  let highpass: f64 = scalar(denoise, "highpass_sigma").parse().unwrap();
  assert!((highpass - 35.714285714).abs() < 1e-6);
}

#[tokio::test]
async fn test_resting_rerun_is_cached() {
  let root = TempDir::new().unwrap();
  let config = config(root.path(), &[PA]);
  let run = SubjectRun::new(&config, SUBJECT).unwrap();

  touch(run.data_dir.join(format!("ses-02/func/{}_{}.nii.gz", SUBJECT, PA)));
  touch(run.data_dir.join(format!("ses-02/fmap/{}_{}_phasediff.nii.gz", SUBJECT, FMAP)));
  touch(run.data_dir.join(format!("ses-02/fmap/{}_{}_magnitude2.nii.gz", SUBJECT, FMAP)));
  for anat in ["T1.nii.gz", "T1_brain.nii.gz", "func_mask.nii.gz"] {
    touch(run.out_dir.join("preprocessed/anat").join(anat));
  }

  let calls = Arc::new(Mutex::new(Vec::new()));
  let registry = fake_registry(PipelineKind::Resting, &calls);
  let workflow = Arc::new(build_workflow(PipelineKind::Resting, &config, &run, &registry).unwrap());

  let first = Runner::new(workflow.clone(), runner_config(&config, &run))
    .run(CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(first.executed, 9);

  let second = Runner::new(workflow, runner_config(&config, &run))
    .run(CancellationToken::new())
    .await
    .unwrap();
  assert!(second.is_success());
  assert_eq!(second.executed, 0);
  assert_eq!(second.cached, 9);
}

#[test]
fn test_unknown_scan_fails_before_running() {
  let root = TempDir::new().unwrap();
  let config = config(root.path(), &[AP, "ses-03_task-rest_acq-AP_run-01_bold"]);
  let run = SubjectRun::new(&config, SUBJECT).unwrap();
  let calls = Arc::new(Mutex::new(Vec::new()));
  let registry = fake_registry(PipelineKind::Resting, &calls);

  let err = build_workflow(PipelineKind::Resting, &config, &run, &registry).unwrap_err();

  assert!(matches!(
    err,
    PipelineError::Resolve(ResolveError::UnknownScanIdentifier(scan))
      if scan == "ses-03_task-rest_acq-AP_run-01_bold"
  ));
  assert!(calls.lock().unwrap().is_empty());
}

#[test]
fn test_configured_protocol_replaces_builtin() {
  let root = TempDir::new().unwrap();
  let mut config = config(root.path(), &["scan-a"]);
  config.protocol = Some(
    serde_json::from_value(json!({
      "scan-a": { "fieldmap_id": "fmap-1", "phase_encoding": "y-" }
    }))
    .unwrap(),
  );
  let run = SubjectRun::new(&config, SUBJECT).unwrap();
  let calls = Arc::new(Mutex::new(Vec::new()));
  let registry = fake_registry(PipelineKind::Resting, &calls);

  let workflow = build_workflow(PipelineKind::Resting, &config, &run, &registry).unwrap();
  assert!(workflow.find("fmap_info", &branch("scan-a")).is_some());

  config.scans = vec![AP.to_string()];
  let err = build_workflow(PipelineKind::Resting, &config, &run, &registry).unwrap_err();
  assert!(matches!(err, PipelineError::Resolve(ResolveError::UnknownScanIdentifier(_))));
}

#[test]
fn test_full_verbosity_publishes_more() {
  let root = TempDir::new().unwrap();
  let mut config = config(root.path(), &[AP]);
  let run = SubjectRun::new(&config, SUBJECT).unwrap();
  let calls = Arc::new(Mutex::new(Vec::new()));
  let registry = fake_registry(PipelineKind::Resting, &calls);

  let sink_ports = |config: &RunConfig| {
    let workflow = build_workflow(PipelineKind::Resting, config, &run, &registry).unwrap();
    let sink = workflow.find("sink", &branch(AP)).unwrap();
    workflow
      .node(sink)
      .unwrap()
      .stage
      .describe()
      .inputs
      .iter()
      .map(|p| p.name.clone())
      .collect::<Vec<_>>()
  };

  let minimal = sink_ports(&config);
  config.execution.verbosity = SinkVerbosity::Full;
  let full = sink_ports(&config);

  assert_eq!(minimal.len(), 31);
  assert_eq!(full.len(), 39);
  assert!(!minimal.contains(&"remove_vol_out_file".to_string()));
  assert!(full.contains(&"remove_vol_out_file".to_string()));
  assert!(full.contains(&"fmap_coreg_shiftmap".to_string()));
}

#[test]
fn test_mni_structure() {
  let root = TempDir::new().unwrap();
  let config = config(root.path(), &[AP, PA]);
  let run = SubjectRun::new(&config, SUBJECT).unwrap();
  let calls = Arc::new(Mutex::new(Vec::new()));
  let registry = fake_registry(PipelineKind::Mni, &calls);

  let workflow = build_workflow(PipelineKind::Mni, &config, &run, &registry).unwrap();

  // anat_files, translist, the grey-matter projection and its sink are shared.
  assert_eq!(workflow.nodes().len(), 5 + 8 * 2);

  let constant = BranchKey::constant();
  let gm = workflow.node(workflow.find("applytransform_gm", &constant).unwrap()).unwrap();
  assert_eq!(gm.config["interpolation"], "NearestNeighbor");
  assert_eq!(gm.config["input_image_type"], 3);
  let cast = workflow.node(workflow.find("changedt_gm", &constant).unwrap()).unwrap();
  assert_eq!(cast.config["output_datatype"], "short");

  for scan in [AP, PA] {
    let dbn = workflow.node(workflow.find("applytransform_dbn", &branch(scan)).unwrap()).unwrap();
    assert_eq!(dbn.config["interpolation"], "BSpline");
    let cast = workflow.node(workflow.find("changedt_dbn", &branch(scan)).unwrap()).unwrap();
    assert_eq!(cast.config["output_datatype"], "float");
    assert_eq!(cast.config["out_file"], "rest_denoised_bandpassed_normed2mni.nii.gz");
  }
}

#[test]
fn test_mni_requires_template() {
  let root = TempDir::new().unwrap();
  let mut config = config(root.path(), &[AP]);
  config.template = None;
  let run = SubjectRun::new(&config, SUBJECT).unwrap();
  let calls = Arc::new(Mutex::new(Vec::new()));
  let registry = fake_registry(PipelineKind::Mni, &calls);

  let err = build_workflow(PipelineKind::Mni, &config, &run, &registry).unwrap_err();
  assert!(matches!(err, PipelineError::MissingTemplate(name) if name == "mni"));
}

#[tokio::test]
async fn test_mni_pipeline_end_to_end() {
  let root = TempDir::new().unwrap();
  let config = config(root.path(), &[AP]);
  let run = SubjectRun::new(&config, SUBJECT).unwrap();

  touch(root.path().join("MNI152_T1_2mm_brain.nii.gz"));
  let anat = run.out_dir.join("preprocessed/anat");
  touch(anat.join("gm.nii.gz"));
  touch(anat.join("transforms2mni/transform0GenericAffine.mat"));
  touch(anat.join("transforms2mni/transform1Warp.nii.gz"));
  let denoised = run
    .out_dir
    .join("preprocessed/func/pb04_denoise/data")
    .join(format!("_scan_id_{}", AP));
  for series in [
    "rest_denoised.nii.gz",
    "rest_denoised_bandpassed.nii.gz",
    "rest_denoised_bandpassed_norm.nii.gz",
  ] {
    touch(denoised.join(series));
  }

  let calls = Arc::new(Mutex::new(Vec::new()));
  let registry = fake_registry(PipelineKind::Mni, &calls);
  let workflow = build_workflow(PipelineKind::Mni, &config, &run, &registry).unwrap();
  let summary = Runner::new(Arc::new(workflow), runner_config(&config, &run))
    .run(CancellationToken::new())
    .await
    .unwrap();

  assert!(summary.is_success(), "failed nodes: {:?}", summary.failed().collect::<Vec<_>>());

  let mni = run.out_dir.join("preprocessed/func/pb05_mni");
  assert!(mni.join("gm_ribbon2mni.nii.gz").exists());
  let segment = mni.join(format!("_scan_id_{}", AP));
  assert!(segment.join("rest_denoised2mni.nii.gz").exists());
  assert!(segment.join("rest_denoised_bandpassed2mni.nii.gz").exists());
  assert!(segment.join("rest_denoised_bandpassed_normed2mni.nii.gz").exists());

  let warp = calls_of(&calls, "apply_transforms");
  assert_eq!(warp.len(), 4);
  let transforms = warp[0].inputs["transforms"].clone();
  assert_eq!(
    transforms,
    PortValue::Files(vec![
      anat.join("transforms2mni/transform1Warp.nii.gz"),
      anat.join("transforms2mni/transform0GenericAffine.mat"),
    ])
  );
  assert!(warp.iter().all(|c| c.config["invert_transform_flags"] == json!([false, false])));
}
