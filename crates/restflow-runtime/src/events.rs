//! Run events and notifiers for observability.
//!
//! Events are emitted by the coordination loop in the order transitions are
//! applied, so a consumer sees `NodeCompleted` for every producer before the
//! `NodeStarted` of any of its consumers.

use restflow_stage::StageOutputs;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
  RunStarted {
    run_id: String,
    workflow: String,
    nodes: usize,
  },

  NodeStarted {
    run_id: String,
    node: String,
    attempt: u32,
  },

  /// The node's previous result was reused.
  NodeCached { run_id: String, node: String },

  NodeCompleted {
    run_id: String,
    node: String,
    outputs: StageOutputs,
  },

  NodeFailed {
    run_id: String,
    node: String,
    error: String,
  },

  /// The node's working directory contents were deleted.
  NodeReclaimed { run_id: String, node: String },

  RunCompleted {
    run_id: String,
    executed: usize,
    cached: usize,
    failed: usize,
  },
}

/// Receives run events.
pub trait RunNotifier: Send + Sync {
  fn notify(&self, event: RunEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl RunNotifier for NoopNotifier {
  fn notify(&self, _event: RunEvent) {}
}

/// Forwards events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls the coordination loop. Volume
  // is a handful of events per node.
  sender: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<RunEvent>) -> Self {
    Self { sender }
  }
}

impl RunNotifier for ChannelNotifier {
  fn notify(&self, event: RunEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
