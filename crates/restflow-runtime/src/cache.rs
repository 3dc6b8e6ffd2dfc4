//! Node fingerprints and on-disk completion markers.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use restflow_stage::{StageInputs, StageOutputs};
use restflow_workflow::{InputSource, Workflow};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Marker written into a node's working directory after it completes.
pub const MARKER_FILE: &str = "_restflow_node.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMarker {
  pub fingerprint: String,
  pub outputs: StageOutputs,
  /// Working directory contents were deleted after all consumers finished.
  #[serde(default)]
  pub reclaimed: bool,
  /// Stamps of the input files read from outside the workflow directory.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub inputs: BTreeMap<PathBuf, FileStamp>,
}

/// Size and modification time of a file, in nanoseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
  pub len: u64,
  pub modified_ns: u64,
}

impl FileStamp {
  pub async fn of(path: &Path) -> io::Result<Self> {
    let metadata = tokio::fs::metadata(path).await?;
    let modified = metadata
      .modified()?
      .duration_since(UNIX_EPOCH)
      .map_err(io::Error::other)?;
    Ok(Self {
      len: metadata.len(),
      modified_ns: u64::try_from(modified.as_nanos()).unwrap_or(u64::MAX),
    })
  }
}

/// Stamp every file input that does not live below `internal_root`.
///
/// Files produced inside the workflow are covered by the fingerprint chain;
/// raw data, anatomy and templates are not, so their stamps go into the
/// marker.
pub(crate) async fn stamp_inputs(inputs: &StageInputs, internal_root: &Path) -> io::Result<BTreeMap<PathBuf, FileStamp>> {
  let mut stamps = BTreeMap::new();
  for value in inputs.values() {
    for path in value.paths() {
      if path.starts_with(internal_root) {
        continue;
      }
      stamps.insert(path.to_path_buf(), FileStamp::of(path).await?);
    }
  }
  Ok(stamps)
}

async fn inputs_unchanged(stamps: &BTreeMap<PathBuf, FileStamp>) -> bool {
  for (path, stamp) in stamps {
    match FileStamp::of(path).await {
      Ok(current) if current == *stamp => {}
      _ => return false,
    }
  }
  true
}

/// Fingerprint of every node, indexed by node id.
///
/// A fingerprint covers the stage name, node name, configuration, branch key
/// and inputs. Edge inputs contribute the upstream fingerprint and port, so
/// the whole chain is known before anything executes.
pub fn fingerprints(workflow: &Workflow) -> Vec<String> {
  let mut fingerprints: Vec<String> = Vec::with_capacity(workflow.nodes().len());

  for node in workflow.nodes() {
    let mut hasher = Sha256::new();
    field(&mut hasher, node.stage.describe().name.as_bytes());
    field(&mut hasher, node.address.name.as_bytes());
    field(&mut hasher, node.config.to_string().as_bytes());
    field(&mut hasher, node.address.branch.to_string().as_bytes());

    for (port, source) in &node.inputs {
      field(&mut hasher, port.as_bytes());
      match source {
        InputSource::Edge(index) => {
          let edge = &workflow.edges()[*index];
          hasher.update(b"edge:");
          field(&mut hasher, fingerprints[edge.source.0].as_bytes());
          field(&mut hasher, edge.source_port.as_bytes());
        }
        InputSource::Literal(value) => {
          hasher.update(b"literal:");
          field(&mut hasher, &serde_json::to_vec(value).unwrap_or_default());
        }
      }
    }

    fingerprints.push(hex::encode(hasher.finalize()));
  }

  fingerprints
}

fn field(hasher: &mut Sha256, bytes: &[u8]) {
  hasher.update(bytes);
  hasher.update([0u8]);
}

pub(crate) fn marker_path(work_dir: &Path) -> PathBuf {
  work_dir.join(MARKER_FILE)
}

/// Read a node marker. Unreadable or malformed markers count as absent.
pub(crate) async fn read_marker(work_dir: &Path) -> Option<NodeMarker> {
  let bytes = tokio::fs::read(marker_path(work_dir)).await.ok()?;
  match serde_json::from_slice(&bytes) {
    Ok(marker) => Some(marker),
    Err(e) => {
      debug!(work_dir = %work_dir.display(), error = %e, "ignoring malformed node marker");
      None
    }
  }
}

pub(crate) async fn write_marker(work_dir: &Path, marker: &NodeMarker) -> io::Result<()> {
  let bytes = serde_json::to_vec_pretty(marker).map_err(io::Error::other)?;
  let tmp = work_dir.join(format!("{}.tmp", MARKER_FILE));
  tokio::fs::write(&tmp, bytes).await?;
  tokio::fs::rename(&tmp, marker_path(work_dir)).await
}

pub(crate) async fn remove_marker(work_dir: &Path) {
  let _ = tokio::fs::remove_file(marker_path(work_dir)).await;
}

async fn outputs_exist(outputs: &StageOutputs) -> bool {
  for value in outputs.values() {
    for path in value.paths() {
      if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return false;
      }
    }
  }
  true
}

/// Decide which nodes can reuse a previous result.
///
/// A node whose recorded external inputs changed on disk is stale, and so is
/// every node downstream of it. Among the rest, walking in reverse
/// topological order, a node is a hit when its marker fingerprint matches and
/// either its outputs still exist, or it was reclaimed and every consumer is
/// a hit as well.
pub(crate) async fn plan(workflow: &Workflow, fingerprints: &[String], work_dirs: &[PathBuf]) -> Vec<Option<NodeMarker>> {
  let count = workflow.nodes().len();

  let mut markers: Vec<Option<NodeMarker>> = Vec::with_capacity(count);
  for node in workflow.nodes() {
    let id = node.id.0;
    let marker = read_marker(&work_dirs[id])
      .await
      .filter(|marker| marker.fingerprint == fingerprints[id]);
    markers.push(marker);
  }

  let mut stale = vec![false; count];
  for node in workflow.nodes() {
    let id = node.id.0;
    let changed = match &markers[id] {
      Some(marker) => !inputs_unchanged(&marker.inputs).await,
      None => false,
    };
    if changed {
      debug!(node = %node.address, "input files changed since last run");
    }
    stale[id] = changed || workflow.upstream(node.id).iter().any(|u| stale[u.0]);
  }

  let mut hits: Vec<Option<NodeMarker>> = vec![None; count];
  for node in workflow.nodes().iter().rev() {
    let id = node.id.0;
    if stale[id] {
      continue;
    }
    let Some(marker) = markers[id].take() else {
      continue;
    };

    let hit = if marker.reclaimed {
      let consumers = workflow.downstream(node.id);
      !consumers.is_empty() && consumers.iter().all(|c| hits[c.0].is_some())
    } else {
      outputs_exist(&marker.outputs).await
    };

    if hit {
      hits[id] = Some(marker);
    }
  }

  hits
}

/// Delete everything in `work_dir` except the marker, then flag the marker
/// as reclaimed. The on-disk marker wins over `fallback` so recorded input
/// stamps survive.
pub(crate) async fn reclaim(work_dir: PathBuf, fallback: NodeMarker) -> io::Result<()> {
  let mut marker = read_marker(&work_dir).await.unwrap_or(fallback);
  let mut entries = tokio::fs::read_dir(&work_dir).await?;
  while let Some(entry) = entries.next_entry().await? {
    if entry.file_name() == MARKER_FILE {
      continue;
    }
    let path = entry.path();
    if entry.file_type().await?.is_dir() {
      tokio::fs::remove_dir_all(&path).await?;
    } else {
      tokio::fs::remove_file(&path).await?;
    }
  }

  marker.reclaimed = true;
  write_marker(&work_dir, &marker).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use restflow_stage::PortValue;

  fn marker(outputs: StageOutputs) -> NodeMarker {
    NodeMarker {
      fingerprint: "abc".to_string(),
      outputs,
      reclaimed: false,
      inputs: BTreeMap::new(),
    }
  }

  #[tokio::test]
  async fn test_marker_round_trip_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let mut outputs = StageOutputs::new();
    outputs.insert("out".to_string(), PortValue::file(dir.path().join("a.nii.gz")));

    write_marker(dir.path(), &marker(outputs.clone())).await.unwrap();
    let read = read_marker(dir.path()).await.unwrap();
    assert_eq!(read.outputs, outputs);
    assert!(!read.reclaimed);
  }

  #[tokio::test]
  async fn test_malformed_marker_is_absent() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(marker_path(dir.path()), b"{not json").unwrap();
    assert!(read_marker(dir.path()).await.is_none());
  }

  #[tokio::test]
  async fn test_reclaim_keeps_marker_only() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("rest_mc.nii.gz"), b"data").unwrap();
    std::fs::create_dir(dir.path().join("mats")).unwrap();
    std::fs::write(dir.path().join("mats/MAT_0000"), b"1 0 0").unwrap();
    write_marker(dir.path(), &marker(StageOutputs::new())).await.unwrap();

    reclaim(dir.path().to_path_buf(), marker(StageOutputs::new()))
      .await
      .unwrap();

    let names: Vec<_> = std::fs::read_dir(dir.path())
      .unwrap()
      .map(|e| e.unwrap().file_name())
      .collect();
    assert_eq!(names, vec![std::ffi::OsString::from(MARKER_FILE)]);
    assert!(read_marker(dir.path()).await.unwrap().reclaimed);
  }

  #[tokio::test]
  async fn test_stamps_cover_external_files_only() {
    let dir = tempfile::tempdir().unwrap();
    let internal_root = dir.path().join("work/resting");
    std::fs::create_dir_all(&internal_root).unwrap();
    let t1 = dir.path().join("T1.nii.gz");
    let moco = internal_root.join("moco.nii.gz");
    std::fs::write(&t1, b"t1").unwrap();
    std::fs::write(&moco, b"moco").unwrap();

    let mut inputs = StageInputs::new();
    inputs.insert("anat".to_string(), PortValue::file(&t1));
    inputs.insert("epi".to_string(), PortValue::file(&moco));
    inputs.insert("tr".to_string(), PortValue::scalar(1.4));

    let stamps = stamp_inputs(&inputs, &internal_root).await.unwrap();
    assert_eq!(stamps.keys().collect::<Vec<_>>(), vec![&t1]);
    assert_eq!(stamps[&t1].len, 2);
    assert!(inputs_unchanged(&stamps).await);

    std::fs::write(&t1, b"t1 rewritten").unwrap();
    assert!(!inputs_unchanged(&stamps).await);
    std::fs::remove_file(&t1).unwrap();
    assert!(!inputs_unchanged(&stamps).await);
  }

  #[tokio::test]
  async fn test_reclaim_preserves_recorded_stamps() {
    let dir = tempfile::tempdir().unwrap();
    let mut recorded = marker(StageOutputs::new());
    recorded.inputs.insert(
      PathBuf::from("/raw/T1.nii.gz"),
      FileStamp { len: 10, modified_ns: 42 },
    );
    write_marker(dir.path(), &recorded).await.unwrap();

    reclaim(dir.path().to_path_buf(), marker(StageOutputs::new()))
      .await
      .unwrap();

    let read = read_marker(dir.path()).await.unwrap();
    assert!(read.reclaimed);
    assert_eq!(read.inputs, recorded.inputs);
  }
}
