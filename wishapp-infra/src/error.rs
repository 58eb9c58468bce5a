use thiserror::Error;

/// Invalid or missing deployment inputs
///
/// Always fatal: the deployment halts before any template is synthesized
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
  #[error("{field} is required but was not provided")]
  Missing { field: &'static str },

  #[error("{field} must not be empty")]
  Empty { field: &'static str },

  #[error("{field} must contain only alphanumeric characters and hyphens (got {value:?})")]
  InvalidFormat { field: &'static str, value: String },

  #[error("pull request context was provided with an empty identifier")]
  EmptyPullRequestId,

  #[error("context entry {entry:?} must be in the form KEY=VALUE")]
  InvalidContext { entry: String },
}
