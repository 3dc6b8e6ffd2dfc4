//! Restflow Runtime
//!
//! The [`Runner`] executes an expanded [`restflow_workflow::Workflow`]. A
//! single coordination loop owns the node state table; stage executions run
//! as tokio tasks and report back one completion at a time.
//!
//! Besides scheduling, the runner handles:
//!
//! - caching via per-node fingerprints and `_restflow_node.json` markers
//! - reclamation of working directories once every consumer is terminal
//! - crash reports for failed nodes
//! - run-wide and per-branch cancellation

mod cache;
mod crash;
mod error;
mod events;
mod runner;
mod state;
mod summary;

pub use cache::{FileStamp, MARKER_FILE, NodeMarker, fingerprints};
pub use crash::CrashReport;
pub use error::RuntimeError;
pub use events::{ChannelNotifier, NoopNotifier, RunEvent, RunNotifier};
pub use runner::{RunHandle, Runner, RunnerConfig};
pub use state::{FailureReason, NodeState};
pub use summary::{BranchTally, NodeReport, RunSummary};
