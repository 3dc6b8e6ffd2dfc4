//! Restflow Resolver
//!
//! Turns per-branch parameters into concrete inputs:
//! - [`render`] substitutes `{name}` placeholders in path templates.
//! - [`ScanProtocol`] maps a scan id to its fieldmap and phase-encode polarity.
//!
//! Both are pure lookups. Neither touches the filesystem; a rendered path that
//! does not exist is reported by the node consuming it.

mod error;
mod scan;
mod template;

pub use error::ResolveError;
pub use scan::{PhaseEncoding, ScanMetadata, ScanProtocol};
pub use template::{Bindings, placeholders, render};
