//! Restflow Config
//!
//! This crate contains the serializable run configuration for restflow.
//! A [`RunConfig`] is loaded once per invocation (usually from a JSON file)
//! and handed to every component at construction. Nothing in the run reads
//! process-wide settings; everything a pipeline needs is in here.
//!
//! Directory fields may contain a `{subject}` placeholder. They are rendered
//! per subject by the pipeline crate, so one configuration file can drive a
//! whole list of subjects.

mod acquisition;
mod execution;
mod run;
mod stage;

pub use acquisition::AcquisitionConfig;
pub use execution::{ExecutionConfig, SinkVerbosity};
pub use run::{ProtocolEntry, RunConfig};
pub use stage::CommandSpec;
