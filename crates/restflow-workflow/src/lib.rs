//! Restflow Workflow
//!
//! Builds the node/edge graph of a pipeline and expands it over iteration
//! variables.
//!
//! [`WorkflowBuilder`] works on node templates: stages are added by name,
//! wired port to port, and inputs that vary per branch are bound to an
//! iteration variable. [`WorkflowBuilder::build`] validates the template and
//! replicates every node once per value tuple of the variables it depends
//! on, producing an immutable [`Workflow`].
//!
//! A node's iteration scope is the union of its own iteration bindings and
//! the scopes of everything upstream. Nodes with an empty scope are
//! constants: they exist once and feed every branch read-only.

mod builder;
mod error;
mod graph;
mod node;
mod workflow;

pub use builder::WorkflowBuilder;
pub use error::WorkflowError;
pub use graph::Graph;
pub use node::{Edge, InputSource, IterationVariable, Node, NodeAddress, NodeId};
pub use restflow_stage::BranchKey;
pub use workflow::Workflow;
