use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use restflow_stage::{
  PortType, PortValue, Stage, StageContext, StageDescriptor, StageError, StageInputs, StageOutputs,
};
use restflow_workflow::{BranchKey, InputSource, WorkflowBuilder};
use serde_json::Value;

struct Fake(StageDescriptor);

#[async_trait]
impl Stage for Fake {
  fn describe(&self) -> &StageDescriptor {
    &self.0
  }

  async fn execute(
    &self,
    _ctx: &StageContext,
    _config: &Value,
    _inputs: &StageInputs,
  ) -> Result<StageOutputs, StageError> {
    Ok(StageOutputs::new())
  }
}

fn stage(descriptor: StageDescriptor) -> Arc<dyn Stage> {
  Arc::new(Fake(descriptor))
}

/// anat (constant) ----------------------\
/// select(scan_id) -> moco -> coreg <----/ -> sink
fn resting_like(scans: &[&str]) -> WorkflowBuilder {
  let mut builder = WorkflowBuilder::new("resting");
  builder.declare_iterable("scan_id", scans.iter().copied()).unwrap();

  builder
    .add_node(
      "anat",
      stage(
        StageDescriptor::new("select_anat")
          .input("subject", PortType::Scalar)
          .output("anat_head", PortType::Image),
      ),
    )
    .unwrap();
  builder
    .add_node(
      "select",
      stage(
        StageDescriptor::new("select_func")
          .input("scan_id", PortType::Scalar)
          .output("func", PortType::Image),
      ),
    )
    .unwrap();
  builder
    .add_node(
      "moco",
      stage(
        StageDescriptor::new("moco")
          .input("epi", PortType::Image)
          .output("epi_moco", PortType::Image)
          .output("par_file", PortType::Text),
      ),
    )
    .unwrap();
  builder
    .add_node(
      "coreg",
      stage(
        StageDescriptor::new("coreg")
          .input("epi", PortType::Image)
          .input("anat_head", PortType::Image)
          .output("coregistered", PortType::Image),
      ),
    )
    .unwrap();

  builder
    .set_input("anat", "subject", PortValue::scalar("sub-01"))
    .unwrap();
  builder.iterate("select", "scan_id", "scan_id").unwrap();
  builder.connect("select", "func", "moco", "epi").unwrap();
  builder.connect("moco", "epi_moco", "coreg", "epi").unwrap();
  builder.connect("anat", "anat_head", "coreg", "anat_head").unwrap();
  builder
}

#[test]
fn test_expansion_is_isomorphic_per_branch() {
  let scans = ["scan-a", "scan-b", "scan-c"];
  let workflow = resting_like(&scans).build("/work").unwrap();

  // one constant anat plus three nodes per branch
  assert_eq!(workflow.nodes().len(), 1 + 3 * scans.len());
  assert_eq!(workflow.branches().len(), scans.len());

  let anat = workflow.find("anat", &BranchKey::constant()).unwrap();
  let mut seen_edges = HashSet::new();

  for scan in scans {
    let key = BranchKey::constant().with("scan_id", scan);
    let select = workflow.find("select", &key).unwrap();
    let moco = workflow.find("moco", &key).unwrap();
    let coreg = workflow.find("coreg", &key).unwrap();

    assert_eq!(workflow.upstream(moco), &[select]);
    let mut coreg_up = workflow.upstream(coreg).to_vec();
    coreg_up.sort();
    let mut expected = vec![moco, anat];
    expected.sort();
    assert_eq!(coreg_up, expected);

    for id in [select, moco, coreg] {
      for edge in workflow.incoming(id) {
        if edge.source != anat {
          assert!(seen_edges.insert((edge.source, edge.target)), "edge shared between branches");
          assert_eq!(workflow.node(edge.source).unwrap().address.branch, key);
        }
      }
    }

    let node = workflow.node(select).unwrap();
    assert_eq!(
      node.inputs.get("scan_id"),
      Some(&InputSource::Literal(PortValue::scalar(scan)))
    );
  }

  // constant node is shared by every branch
  assert_eq!(workflow.downstream(anat).len(), scans.len());
}

#[test]
fn test_node_ids_follow_topological_order() {
  let workflow = resting_like(&["a", "b"]).build("/work").unwrap();
  for edge in workflow.edges() {
    assert!(edge.source < edge.target);
  }
  let order: Vec<_> = workflow.topological_order().collect();
  assert_eq!(order.len(), workflow.nodes().len());
}

#[test]
fn test_expansion_is_deterministic() {
  let first = resting_like(&["a", "b"]).build("/work").unwrap();
  let second = resting_like(&["a", "b"]).build("/work").unwrap();
  let addresses = |w: &restflow_workflow::Workflow| {
    w.nodes()
      .iter()
      .map(|n| n.address.to_string())
      .collect::<Vec<_>>()
  };
  assert_eq!(addresses(&first), addresses(&second));
  assert_eq!(first.to_dot(), second.to_dot());
}

#[test]
fn test_two_variables_expand_cartesian() {
  let mut builder = WorkflowBuilder::new("wf");
  builder.declare_iterable("subject", ["s1", "s2"]).unwrap();
  builder.declare_iterable("scan_id", ["a", "b", "c"]).unwrap();
  builder
    .add_node(
      "pick",
      stage(
        StageDescriptor::new("pick")
          .input("subject", PortType::Scalar)
          .input("scan_id", PortType::Scalar)
          .output("out", PortType::Image),
      ),
    )
    .unwrap();
  builder
    .add_node(
      "per_subject",
      stage(
        StageDescriptor::new("per_subject")
          .input("subject", PortType::Scalar)
          .output("out", PortType::Image),
      ),
    )
    .unwrap();
  builder.iterate("pick", "scan_id", "scan_id").unwrap();
  builder.iterate("pick", "subject", "subject").unwrap();
  builder.iterate("per_subject", "subject", "subject").unwrap();

  let workflow = builder.build("/work").unwrap();
  assert_eq!(workflow.nodes().len(), 6 + 2);

  let key = BranchKey::constant().with("subject", "s2").with("scan_id", "b");
  assert!(workflow.find("pick", &key).is_some());
  assert_eq!(workflow.branches().len(), 6 + 2);
}

#[test]
fn test_work_dir_layout() {
  let workflow = resting_like(&["scan-a"]).build("/work").unwrap();
  let key = BranchKey::constant().with("scan_id", "scan-a");
  let moco = workflow.find("moco", &key).unwrap();
  let anat = workflow.find("anat", &BranchKey::constant()).unwrap();

  assert_eq!(
    workflow.work_dir(moco),
    Some(PathBuf::from("/work/resting/_scan_id_scan-a/moco"))
  );
  assert_eq!(
    workflow.work_dir(anat),
    Some(PathBuf::from("/work/resting/anat"))
  );
}

#[test]
fn test_descendants_stay_in_branch() {
  let workflow = resting_like(&["a", "b"]).build("/work").unwrap();
  let key_a = BranchKey::constant().with("scan_id", "a");
  let select = workflow.find("select", &key_a).unwrap();

  let descendants = workflow.descendants(select);
  assert_eq!(descendants.len(), 2);
  for id in descendants {
    assert_eq!(workflow.node(id).unwrap().address.branch, key_a);
  }
}

#[test]
fn test_dot_export_lists_edges() {
  let workflow = resting_like(&["a"]).build("/work").unwrap();
  let dot = workflow.to_dot();
  assert!(dot.starts_with("digraph \"resting\" {"));
  assert!(dot.contains("moco[scan_id=a]"));
  assert!(dot.contains("epi_moco -> epi"));
}
