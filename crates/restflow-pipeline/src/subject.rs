use std::path::PathBuf;

use restflow_config::RunConfig;
use restflow_resolver::{Bindings, render};

use crate::error::PipelineError;

/// Directories of one subject, rendered from the run configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectRun {
  pub subject: String,
  pub working_dir: PathBuf,
  pub out_dir: PathBuf,
  pub data_dir: PathBuf,
  pub freesurfer_dir: PathBuf,
  pub crash_dir: PathBuf,
}

impl SubjectRun {
  /// Render every `{subject}` placeholder of the configured directories.
  ///
  /// The crash directory defaults to `<working_dir>/crash_files`.
  pub fn new(config: &RunConfig, subject: &str) -> Result<Self, PipelineError> {
    let mut bindings = Bindings::new();
    bindings.insert("subject".to_string(), subject.to_string());
    let dir = |template: &str| render(template, &bindings).map(PathBuf::from);

    let working_dir = dir(&config.working_dir)?;
    let crash_dir = match &config.execution.crash_dir {
      Some(template) => dir(template)?,
      None => working_dir.join("crash_files"),
    };

    Ok(Self {
      subject: subject.to_string(),
      out_dir: dir(&config.out_dir)?,
      data_dir: dir(&config.data_dir)?,
      freesurfer_dir: dir(&config.freesurfer_dir)?,
      working_dir,
      crash_dir,
    })
  }

  /// Placeholder bindings available to every path template of the subject.
  pub fn bindings(&self) -> Bindings {
    let mut bindings = Bindings::new();
    bindings.insert("subject".to_string(), self.subject.clone());
    bindings.insert("data_dir".to_string(), self.data_dir.display().to_string());
    bindings.insert("out_dir".to_string(), self.out_dir.display().to_string());
    bindings
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use restflow_resolver::ResolveError;

  fn config(working_dir: &str, crash_dir: Option<&str>) -> RunConfig {
    let mut config: RunConfig = serde_json::from_value(serde_json::json!({
      "working_dir": working_dir,
      "out_dir": "/prcs/{subject}",
      "data_dir": "/raw/{subject}",
      "freesurfer_dir": "/freesurfer",
      "acquisition": {
        "echo_space": 0.00067, "te_diff": 2.46, "epi_resolution": 2.3,
        "tr": 1.4, "highpass": 0.01, "lowpass": 0.1, "vol_to_remove": 5
      },
      "scans": []
    }))
    .unwrap();
    config.execution.crash_dir = crash_dir.map(str::to_string);
    config
  }

  #[test]
  fn test_renders_subject_dirs() {
    let run = SubjectRun::new(&config("/work/{subject}", None), "sub-010100").unwrap();
    assert_eq!(run.working_dir, PathBuf::from("/work/sub-010100"));
    assert_eq!(run.out_dir, PathBuf::from("/prcs/sub-010100"));
    assert_eq!(run.data_dir, PathBuf::from("/raw/sub-010100"));
    assert_eq!(run.freesurfer_dir, PathBuf::from("/freesurfer"));
    assert_eq!(run.crash_dir, PathBuf::from("/work/sub-010100/crash_files"));
  }

  #[test]
  fn test_explicit_crash_dir() {
    let run = SubjectRun::new(&config("/work", Some("/crash/{subject}")), "s1").unwrap();
    assert_eq!(run.crash_dir, PathBuf::from("/crash/s1"));
  }

  #[test]
  fn test_unknown_placeholder_in_dir() {
    let err = SubjectRun::new(&config("/work/{site}", None), "s1").unwrap_err();
    assert!(matches!(
      err,
      PipelineError::Resolve(ResolveError::UnresolvedPlaceholder { .. })
    ));
  }
}
