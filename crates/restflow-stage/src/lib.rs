//! Restflow Stage
//!
//! A stage is an opaque processing operation with typed input and output
//! ports. The orchestration layer never looks inside a stage: it hands a
//! stage its configuration and resolved inputs, and gets back named outputs
//! or a [`StageError`].
//!
//! - [`Stage`] is the capability interface every tool implements.
//! - [`StageDescriptor`] declares a stage's ports and default configuration.
//! - [`StageRegistry`] owns the stages available to a run.
//! - [`CommandStage`] runs an external program speaking a JSON protocol.
//! - [`SelectFiles`], [`FieldmapInfo`] and [`Merge`] are in-process stages
//!   used for input binding and list building.

mod branch;
mod builtin;
mod command;
mod descriptor;
mod error;
mod port;
mod registry;
mod stage;

pub use branch::{BranchKey, path_safe};
pub use builtin::{FieldmapInfo, FileTemplate, Merge, SelectFiles};
pub use command::{CommandStage, STAGE_LOG_FILE};
pub use descriptor::StageDescriptor;
pub use error::{RegistryError, StageError};
pub use port::{PortSpec, PortType, PortValue};
pub use registry::StageRegistry;
pub use stage::{Stage, StageContext, StageInputs, StageOutputs};
