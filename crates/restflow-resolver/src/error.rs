use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
  #[error("unresolved placeholder '{{{placeholder}}}' in template '{template}'")]
  UnresolvedPlaceholder {
    placeholder: String,
    template: String,
  },

  #[error("unknown scan identifier: {0}")]
  UnknownScanIdentifier(String),

  #[error("invalid phase encoding '{0}' (expected 'y' or 'y-')")]
  InvalidPhaseEncoding(String),
}
