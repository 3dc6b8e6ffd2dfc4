//! Restflow Sink
//!
//! Publishes branch artifacts into the structured output archive.
//!
//! A [`SinkMapping`] routes sink input ports to destination templates; the
//! [`OutputSink`] renders a destination per branch, applies the literal
//! rename table to the file name and copies the artifact. [`SinkStage`]
//! wraps both as a terminal graph node.

mod error;
mod mapping;
mod sink;
mod stage;

pub use error::SinkError;
pub use mapping::{SinkMapping, SinkRoute, Substitution};
pub use sink::OutputSink;
pub use stage::SinkStage;
