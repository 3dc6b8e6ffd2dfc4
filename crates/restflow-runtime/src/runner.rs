//! The coordination loop.
//!
//! The [`Runner`] owns the state table of an expanded workflow. Workers are
//! spawned onto a [`JoinSet`]; the loop handles one message at a time (a
//! worker completion, a reclamation result, a cancellation request) and
//! applies every state transition and readiness recomputation itself.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use restflow_stage::{BranchKey, StageContext, StageError, StageInputs, StageOutputs};
use restflow_workflow::{InputSource, Node, NodeId, Workflow};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::cache::{self, NodeMarker};
use crate::crash::CrashReport;
use crate::error::RuntimeError;
use crate::events::{NoopNotifier, RunEvent, RunNotifier};
use crate::state::{FailureReason, NodeState};
use crate::summary::{NodeReport, RunSummary};

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
  /// Upper bound on concurrently running stages. Values below 1 count as 1.
  pub max_concurrency: usize,
  pub reclaim_work_dirs: bool,
  pub use_cache: bool,
  /// Where crash reports go. `None` disables them.
  pub crash_dir: Option<PathBuf>,
}

impl Default for RunnerConfig {
  fn default() -> Self {
    Self {
      max_concurrency: 4,
      reclaim_work_dirs: true,
      use_cache: true,
      crash_dir: None,
    }
  }
}

#[derive(Debug)]
enum Control {
  CancelBranch(BranchKey),
}

/// Sends control requests to a running [`Runner`].
#[derive(Debug, Clone)]
pub struct RunHandle {
  sender: mpsc::UnboundedSender<Control>,
}

impl RunHandle {
  /// Fail every non-terminal node whose branch key contains `branch` with
  /// `Cancelled`. Other branches keep running.
  pub fn cancel_branch(&self, branch: BranchKey) {
    // Receiver is gone once the run finished
    let _ = self.sender.send(Control::CancelBranch(branch));
  }
}

/// Executes a workflow.
pub struct Runner {
  workflow: Arc<Workflow>,
  config: RunnerConfig,
  notifier: Arc<dyn RunNotifier>,
  control_tx: mpsc::UnboundedSender<Control>,
  control_rx: mpsc::UnboundedReceiver<Control>,
}

/// Why a worker did not produce outputs.
enum WorkerError {
  Stage(StageError),
  MissingInputFile { port: String, path: PathBuf },
  Internal(String),
}

impl WorkerError {
  fn reason(&self) -> FailureReason {
    match self {
      WorkerError::Stage(err @ StageError::SinkWrite { .. }) => FailureReason::SinkWrite {
        message: err.to_string(),
      },
      WorkerError::Stage(StageError::Cancelled) => FailureReason::Cancelled,
      WorkerError::Stage(err) => FailureReason::Stage {
        message: err.to_string(),
      },
      WorkerError::MissingInputFile { port, path } => FailureReason::MissingInputFile {
        port: port.clone(),
        path: path.clone(),
      },
      WorkerError::Internal(message) => FailureReason::Internal(message.clone()),
    }
  }

  fn log(&self) -> Option<&str> {
    match self {
      WorkerError::Stage(err) => err.log(),
      _ => None,
    }
  }
}

struct WorkerOutcome {
  id: NodeId,
  result: Result<StageOutputs, WorkerError>,
}

/// Mutable bookkeeping of one run. Indexed by node id.
struct RunState {
  states: Vec<NodeState>,
  outputs: Vec<Option<StageOutputs>>,
  crash_reports: Vec<Option<PathBuf>>,
  attempts: Vec<u32>,
  reclaimed: Vec<bool>,
  ready: VecDeque<NodeId>,
  tokens: HashMap<NodeId, CancellationToken>,
  to_reclaim: Vec<NodeId>,
  executed: usize,
  cached: usize,
}

impl RunState {
  fn new(count: usize) -> Self {
    Self {
      states: vec![NodeState::Pending; count],
      outputs: vec![None; count],
      crash_reports: vec![None; count],
      attempts: vec![0; count],
      reclaimed: vec![false; count],
      ready: VecDeque::new(),
      tokens: HashMap::new(),
      to_reclaim: Vec::new(),
      executed: 0,
      cached: 0,
    }
  }
}

/// Immutable context shared by the loop's helpers.
struct Coordinator {
  run_id: String,
  workflow: Arc<Workflow>,
  config: RunnerConfig,
  notifier: Arc<dyn RunNotifier>,
  fingerprints: Vec<String>,
  work_dirs: Vec<PathBuf>,
  /// Files below this root are produced by the workflow itself.
  internal_root: PathBuf,
}

impl Runner {
  pub fn new(workflow: Arc<Workflow>, config: RunnerConfig) -> Self {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    Self {
      workflow,
      config,
      notifier: Arc::new(NoopNotifier),
      control_tx,
      control_rx,
    }
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn RunNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn handle(&self) -> RunHandle {
    RunHandle {
      sender: self.control_tx.clone(),
    }
  }

  /// Execute the workflow until every node is terminal.
  ///
  /// Node failures do not make this return an error; they are reported in
  /// the [`RunSummary`]. Cancelling `cancel` fails all remaining nodes with
  /// `Cancelled` and waits for running stages to stop.
  #[instrument(name = "runner_run", skip(self, cancel), fields(workflow = %self.workflow.name()))]
  pub async fn run(self, cancel: CancellationToken) -> Result<RunSummary, RuntimeError> {
    let Runner {
      workflow,
      config,
      notifier,
      control_tx,
      mut control_rx,
    } = self;
    // Only external handles keep the control channel open
    drop(control_tx);

    let run_id = uuid::Uuid::new_v4().to_string();
    let count = workflow.nodes().len();

    info!(
      run_id = %run_id,
      workflow = %workflow.name(),
      nodes = count,
      branches = workflow.branches().len(),
      "run_started"
    );
    notifier.notify(RunEvent::RunStarted {
      run_id: run_id.clone(),
      workflow: workflow.name().to_string(),
      nodes: count,
    });

    let base_dir = workflow.base_dir().to_path_buf();
    tokio::fs::create_dir_all(&base_dir)
      .await
      .map_err(|source| RuntimeError::Io {
        path: base_dir.clone(),
        source,
      })?;

    let work_dirs = (0..count)
      .map(|i| workflow.work_dir(NodeId(i)).ok_or(RuntimeError::UnknownNode(NodeId(i))))
      .collect::<Result<Vec<_>, _>>()?;

    let coordinator = Coordinator {
      fingerprints: cache::fingerprints(&workflow),
      internal_root: workflow.base_dir().join(workflow.name()),
      run_id,
      workflow,
      config,
      notifier,
      work_dirs,
    };
    let mut run = RunState::new(count);

    if coordinator.config.use_cache {
      coordinator.apply_cache_plan(&mut run).await;
    }

    let max_concurrency = coordinator.config.max_concurrency.max(1);
    let mut workers: JoinSet<WorkerOutcome> = JoinSet::new();
    let mut reclaims: JoinSet<(NodeId, std::io::Result<()>)> = JoinSet::new();
    let mut control_open = true;
    let mut cancelled = false;
    let mut reclaimed = 0;

    loop {
      coordinator.promote(&mut run).await;
      coordinator.spawn_reclaims(&mut run, &mut reclaims);

      while workers.len() < max_concurrency {
        let Some(id) = run.ready.pop_front() else {
          break;
        };
        coordinator.spawn_worker(&mut run, &mut workers, &cancel, id).await;
      }

      if workers.is_empty() && run.ready.is_empty() {
        break;
      }

      tokio::select! {
        _ = cancel.cancelled(), if !cancelled => {
          cancelled = true;
          warn!(run_id = %coordinator.run_id, "run cancelled");
          coordinator.cancel_matching(&mut run, &BranchKey::constant());
        }
        control = control_rx.recv(), if control_open => match control {
          Some(Control::CancelBranch(branch)) => {
            warn!(run_id = %coordinator.run_id, branch = %branch, "branch cancelled");
            coordinator.cancel_matching(&mut run, &branch);
          }
          None => control_open = false,
        },
        Some(joined) = workers.join_next() => {
          let outcome = joined?;
          coordinator.complete(&mut run, outcome).await;
        }
        Some(joined) = reclaims.join_next(), if !reclaims.is_empty() => {
          reclaimed += coordinator.reclaimed(joined?);
        }
      }
    }

    coordinator.spawn_reclaims(&mut run, &mut reclaims);
    while let Some(joined) = reclaims.join_next().await {
      reclaimed += coordinator.reclaimed(joined?);
    }

    Ok(coordinator.finish(run, reclaimed, cancelled))
  }
}

impl Coordinator {
  fn node(&self, id: NodeId) -> &Node {
    &self.workflow.nodes()[id.0]
  }

  async fn apply_cache_plan(&self, run: &mut RunState) {
    let plan = cache::plan(&self.workflow, &self.fingerprints, &self.work_dirs).await;

    for (i, hit) in plan.into_iter().enumerate() {
      let Some(marker) = hit else {
        continue;
      };
      let id = NodeId(i);
      run.states[i] = NodeState::Done { cached: true };
      run.outputs[i] = Some(marker.outputs);
      run.reclaimed[i] = marker.reclaimed;
      run.cached += 1;

      let node = self.node(id).address.to_string();
      info!(run_id = %self.run_id, node = %node, "node_cached");
      self.notifier.notify(RunEvent::NodeCached {
        run_id: self.run_id.clone(),
        node,
      });
    }

    for i in 0..run.states.len() {
      self.maybe_reclaim(run, NodeId(i));
    }
  }

  /// Move pending nodes whose producers are all done to `Ready`.
  ///
  /// Node ids follow topological order, so one pass settles every node.
  async fn promote(&self, run: &mut RunState) {
    for node in self.workflow.nodes() {
      let id = node.id;
      if run.states[id.0] != NodeState::Pending {
        continue;
      }

      let mut waiting = false;
      let mut failure = None;
      for edge in self.workflow.incoming(id) {
        match &run.states[edge.source.0] {
          NodeState::Done { .. } => {
            let produced = run.outputs[edge.source.0]
              .as_ref()
              .is_some_and(|outputs| outputs.contains_key(&edge.source_port));
            if !produced {
              failure = Some(FailureReason::MissingOutput {
                upstream: self.node(edge.source).address.clone(),
                port: edge.source_port.clone(),
              });
              break;
            }
          }
          NodeState::Failed(_) => {
            failure = Some(FailureReason::Blocked {
              upstream: self.node(edge.source).address.clone(),
            });
            break;
          }
          _ => waiting = true,
        }
      }

      if let Some(reason) = failure {
        self.fail(run, id, reason, None).await;
      } else if !waiting {
        run.states[id.0] = NodeState::Ready;
        run.ready.push_back(id);
      }
    }
  }

  fn inputs_for(&self, run: &RunState, id: NodeId) -> Option<StageInputs> {
    let mut inputs = StageInputs::new();
    for (port, source) in &self.node(id).inputs {
      let value = match source {
        InputSource::Literal(value) => value.clone(),
        InputSource::Edge(index) => {
          let edge = self.workflow.edge(*index)?;
          run.outputs[edge.source.0]
            .as_ref()?
            .get(&edge.source_port)?
            .clone()
        }
      };
      inputs.insert(port.clone(), value);
    }
    Some(inputs)
  }

  async fn spawn_worker(
    &self,
    run: &mut RunState,
    workers: &mut JoinSet<WorkerOutcome>,
    cancel: &CancellationToken,
    id: NodeId,
  ) {
    let Some(inputs) = self.inputs_for(run, id) else {
      let reason = FailureReason::Internal("inputs unavailable at dispatch".to_string());
      self.fail(run, id, reason, None).await;
      return;
    };

    let node = self.node(id).clone();
    let token = cancel.child_token();
    run.states[id.0] = NodeState::Running;
    run.attempts[id.0] += 1;
    run.tokens.insert(id, token.clone());

    let address = node.address.to_string();
    info!(
      run_id = %self.run_id,
      node = %address,
      stage = %node.stage.describe().name,
      attempt = run.attempts[id.0],
      "node_started"
    );
    self.notifier.notify(RunEvent::NodeStarted {
      run_id: self.run_id.clone(),
      node: address.clone(),
      attempt: run.attempts[id.0],
    });

    let ctx = StageContext {
      address,
      branch: node.address.branch.clone(),
      work_dir: self.work_dirs[id.0].clone(),
      cancel: token,
    };
    let fingerprint = self.fingerprints[id.0].clone();
    let internal_root = self.internal_root.clone();

    workers.spawn(async move {
      let task = execute_node(node, ctx, inputs, fingerprint, internal_root);
      let result = match AssertUnwindSafe(task).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(WorkerError::Internal(panic_message(panic))),
      };
      WorkerOutcome { id, result }
    });
  }

  async fn complete(&self, run: &mut RunState, outcome: WorkerOutcome) {
    let WorkerOutcome { id, result } = outcome;
    run.tokens.remove(&id);
    let node = self.node(id);

    if run.states[id.0] != NodeState::Running {
      // Cancelled while running; the node is already terminal but its
      // producers could not be reclaimed until the worker let go.
      self.on_terminal(run, id);
      return;
    }

    match result {
      Ok(outputs) => {
        run.executed += 1;
        run.states[id.0] = NodeState::Done { cached: false };
        info!(run_id = %self.run_id, node = %node.address, "node_completed");
        self.notifier.notify(RunEvent::NodeCompleted {
          run_id: self.run_id.clone(),
          node: node.address.to_string(),
          outputs: outputs.clone(),
        });
        run.outputs[id.0] = Some(outputs);
        self.on_terminal(run, id);
      }
      Err(WorkerError::Stage(err)) if err.is_retryable() && run.attempts[id.0] <= node.retries => {
        warn!(
          run_id = %self.run_id,
          node = %node.address,
          attempt = run.attempts[id.0],
          error = %err,
          "retrying node"
        );
        run.states[id.0] = NodeState::Ready;
        run.ready.push_back(id);
      }
      Err(err) => {
        let reason = err.reason();
        let crash = if reason.is_origin() {
          self.write_crash_report(run, id, &reason, err.log()).await
        } else {
          None
        };
        self.fail(run, id, reason, crash).await;
      }
    }
  }

  /// Fail `id` and block every non-terminal descendant.
  async fn fail(&self, run: &mut RunState, id: NodeId, reason: FailureReason, crash: Option<PathBuf>) {
    let crash = match crash {
      Some(path) => Some(path),
      None if matches!(reason, FailureReason::MissingOutput { .. }) => {
        self.write_crash_report(run, id, &reason, None).await
      }
      None => None,
    };
    self.mark_failed(run, id, reason, crash);

    let upstream = self.node(id).address.clone();
    for descendant in self.workflow.descendants(id) {
      let state = &run.states[descendant.0];
      if state.is_terminal() || *state == NodeState::Running {
        continue;
      }
      let reason = FailureReason::Blocked {
        upstream: upstream.clone(),
      };
      self.mark_failed(run, descendant, reason, None);
    }
  }

  fn mark_failed(&self, run: &mut RunState, id: NodeId, reason: FailureReason, crash: Option<PathBuf>) {
    let node = self.node(id);
    if reason.is_origin() {
      error!(
        run_id = %self.run_id,
        node = %node.address,
        error = %reason,
        crash_report = ?crash,
        "node_failed"
      );
    } else {
      warn!(run_id = %self.run_id, node = %node.address, error = %reason, "node_failed");
    }
    self.notifier.notify(RunEvent::NodeFailed {
      run_id: self.run_id.clone(),
      node: node.address.to_string(),
      error: reason.to_string(),
    });

    run.states[id.0] = NodeState::Failed(reason);
    run.crash_reports[id.0] = crash;
    run.ready.retain(|queued| *queued != id);
    self.on_terminal(run, id);
  }

  /// Cancel every non-terminal node whose branch key contains `branch`.
  fn cancel_matching(&self, run: &mut RunState, branch: &BranchKey) {
    for node in self.workflow.nodes() {
      if !node.address.branch.contains(branch) {
        continue;
      }
      match run.states[node.id.0] {
        NodeState::Running => {
          if let Some(token) = run.tokens.get(&node.id) {
            token.cancel();
          }
          self.mark_failed(run, node.id, FailureReason::Cancelled, None);
        }
        NodeState::Pending | NodeState::Ready => {
          self.mark_failed(run, node.id, FailureReason::Cancelled, None);
        }
        _ => {}
      }
    }
  }

  fn on_terminal(&self, run: &mut RunState, id: NodeId) {
    for upstream in self.workflow.upstream(id) {
      self.maybe_reclaim(run, *upstream);
    }
  }

  /// Queue reclamation of `id` once it is done and every consumer is terminal.
  fn maybe_reclaim(&self, run: &mut RunState, id: NodeId) {
    if !self.config.reclaim_work_dirs || run.reclaimed[id.0] || !run.states[id.0].is_done() {
      return;
    }
    let consumers = self.workflow.downstream(id);
    let settled = |c: &NodeId| run.states[c.0].is_terminal() && !run.tokens.contains_key(c);
    if consumers.is_empty() || !consumers.iter().all(settled) {
      return;
    }
    run.reclaimed[id.0] = true;
    run.to_reclaim.push(id);
  }

  fn spawn_reclaims(&self, run: &mut RunState, reclaims: &mut JoinSet<(NodeId, std::io::Result<()>)>) {
    for id in run.to_reclaim.drain(..) {
      let marker = NodeMarker {
        fingerprint: self.fingerprints[id.0].clone(),
        outputs: run.outputs[id.0].clone().unwrap_or_default(),
        reclaimed: true,
        inputs: Default::default(),
      };
      let work_dir = self.work_dirs[id.0].clone();
      reclaims.spawn(async move { (id, cache::reclaim(work_dir, marker).await) });
    }
  }

  /// Record a reclamation result. Returns 1 on success.
  fn reclaimed(&self, (id, result): (NodeId, std::io::Result<()>)) -> usize {
    let node = self.node(id).address.to_string();
    match result {
      Ok(()) => {
        info!(run_id = %self.run_id, node = %node, "node_reclaimed");
        self.notifier.notify(RunEvent::NodeReclaimed {
          run_id: self.run_id.clone(),
          node,
        });
        1
      }
      Err(e) => {
        warn!(run_id = %self.run_id, node = %node, error = %e, "reclamation failed");
        0
      }
    }
  }

  async fn write_crash_report(
    &self,
    run: &RunState,
    id: NodeId,
    reason: &FailureReason,
    log: Option<&str>,
  ) -> Option<PathBuf> {
    let crash_dir = self.config.crash_dir.as_ref()?;
    let node = self.node(id);
    let report = CrashReport {
      run_id: self.run_id.clone(),
      node: node.address.to_string(),
      stage: node.stage.describe().name.clone(),
      branch: node.address.branch.clone(),
      config: node.config.clone(),
      inputs: self.inputs_for(run, id).unwrap_or_default(),
      error: reason.to_string(),
    };

    match report.write(crash_dir, &node.address.slug(), log).await {
      Ok(path) => Some(path),
      Err(e) => {
        warn!(
          run_id = %self.run_id,
          node = %node.address,
          crash_dir = %crash_dir.display(),
          error = %e,
          "failed to write crash report"
        );
        None
      }
    }
  }

  fn finish(self, run: RunState, reclaimed: usize, cancelled: bool) -> RunSummary {
    let nodes: Vec<NodeReport> = self
      .workflow
      .nodes()
      .iter()
      .zip(run.states)
      .zip(run.crash_reports)
      .map(|((node, state), crash_report)| NodeReport {
        address: node.address.clone(),
        state,
        crash_report,
      })
      .collect();

    let failed = nodes
      .iter()
      .filter(|r| matches!(r.state, NodeState::Failed(_)))
      .count();
    info!(
      run_id = %self.run_id,
      executed = run.executed,
      cached = run.cached,
      failed,
      "run_completed"
    );
    self.notifier.notify(RunEvent::RunCompleted {
      run_id: self.run_id.clone(),
      executed: run.executed,
      cached: run.cached,
      failed,
    });

    RunSummary {
      branches: RunSummary::tally(&nodes),
      run_id: self.run_id,
      workflow: self.workflow.name().to_string(),
      nodes,
      executed: run.executed,
      cached: run.cached,
      reclaimed,
      cancelled,
    }
  }
}

/// Runs on a worker task.
async fn execute_node(
  node: Node,
  ctx: StageContext,
  inputs: StageInputs,
  fingerprint: String,
  internal_root: PathBuf,
) -> Result<StageOutputs, WorkerError> {
  for (port, value) in &inputs {
    for path in value.paths() {
      if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(WorkerError::MissingInputFile {
          port: port.clone(),
          path: path.to_path_buf(),
        });
      }
    }
  }

  let stamps = cache::stamp_inputs(&inputs, &internal_root)
    .await
    .map_err(|e| WorkerError::Internal(format!("failed to stamp input files: {}", e)))?;

  prepare_work_dir(&ctx.work_dir).await?;

  let outputs = node
    .stage
    .execute(&ctx, &node.config, &inputs)
    .await
    .map_err(WorkerError::Stage)?;

  let marker = NodeMarker {
    fingerprint,
    outputs: outputs.clone(),
    reclaimed: false,
    inputs: stamps,
  };
  if let Err(e) = cache::write_marker(&ctx.work_dir, &marker).await {
    warn!(node = %ctx.address, error = %e, "failed to write node marker");
  }

  Ok(outputs)
}

async fn prepare_work_dir(work_dir: &Path) -> Result<(), WorkerError> {
  tokio::fs::create_dir_all(work_dir).await.map_err(|e| {
    WorkerError::Internal(format!(
      "failed to create working directory '{}': {}",
      work_dir.display(),
      e
    ))
  })?;
  cache::remove_marker(work_dir).await;
  Ok(())
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
  if let Some(message) = panic.downcast_ref::<&str>() {
    format!("stage panicked: {}", message)
  } else if let Some(message) = panic.downcast_ref::<String>() {
    format!("stage panicked: {}", message)
  } else {
    "stage panicked".to_string()
  }
}
