use std::path::PathBuf;

use restflow_resolver::ResolveError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
  #[error(transparent)]
  Template(#[from] ResolveError),

  #[error("failed to publish '{}' to '{}': {source}", from.display(), to.display())]
  Write {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("sink port '{0}' is scalar; only file ports can be published")]
  UnsupportedPort(String),

  #[error("sink port '{0}' is routed twice")]
  DuplicateRoute(String),

  #[error("'{}' has no file name", .0.display())]
  NoFileName(PathBuf),
}
