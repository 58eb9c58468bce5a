use std::{fmt, sync::OnceLock};

use regex_lite::Regex;
use serde::Serialize;

use crate::{context::EnvironmentContext, error::ConfigurationError};

/// Application name used as the root of resource names and the access tag
pub const APPLICATION: &str = "wishapp";

/// Branch whose pushes are allowed to assume the deploy role
const MAIN_BRANCH_REF: &str = "refs/heads/main";

fn identifier_regex() -> &'static Regex {
  static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
  IDENTIFIER.get_or_init(|| Regex::new(r"^[A-Za-z0-9-]+$").expect("identifier pattern is valid"))
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvironmentKind {
  Production,
  PullRequest,
}

impl fmt::Display for EnvironmentKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EnvironmentKind::Production => write!(f, "production"),
      EnvironmentKind::PullRequest => write!(f, "pull-request"),
    }
  }
}

/// Naming, trust and tagging identity of a single deployment
///
/// Only [`resolve_environment`] constructs this type, so the prefix, suffix and access tag always
/// reflect the same kind and there are always exactly two trust subjects
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedEnvironment {
  kind: EnvironmentKind,
  name_prefix: String,
  name_suffix: String,
  trust_subject_patterns: [String; 2],
  access_tag: String,
}

impl ResolvedEnvironment {
  pub fn kind(&self) -> EnvironmentKind {
    self.kind
  }

  /// Prepended to resource names; empty in production
  pub fn name_prefix(&self) -> &str {
    &self.name_prefix
  }

  /// Appended to stack names and the access tag
  pub fn name_suffix(&self) -> &str {
    &self.name_suffix
  }

  pub fn trust_subject_patterns(&self) -> &[String] {
    &self.trust_subject_patterns
  }

  /// Value of the `Environment` tag used to scope tag-based authorization
  pub fn access_tag(&self) -> &str {
    &self.access_tag
  }

  /// Prefix a resource name for this environment, e.g. `wishapp-api` -> `pr-7-wishapp-api`
  pub fn resource_name(&self, name: &str) -> String {
    format!("{}{name}", self.name_prefix)
  }
}

fn validate_identifier(field: &'static str, value: &str) -> Result<(), ConfigurationError> {
  if value.is_empty() {
    return Err(ConfigurationError::Empty { field });
  }

  if !identifier_regex().is_match(value) {
    return Err(ConfigurationError::InvalidFormat {
      field,
      value: value.to_owned(),
    });
  }

  Ok(())
}

/// Derive the environment identity from the repository and optional pull request
///
/// Pure: no I/O and no ambient state, identical inputs always produce identical output.
/// Trust subjects are the same for both kinds since either event type may deploy either environment.
pub fn resolve_environment(context: &EnvironmentContext) -> Result<ResolvedEnvironment, ConfigurationError> {
  validate_identifier("GITHUB_ORG", &context.organization)?;
  validate_identifier("GITHUB_REPO", &context.repository)?;

  let (kind, name_prefix, name_suffix) = match context.pull_request_id.as_deref() {
    None => (EnvironmentKind::Production, String::new(), "-prod".to_owned()),
    Some("") => return Err(ConfigurationError::EmptyPullRequestId),
    Some(id) => (EnvironmentKind::PullRequest, format!("pr-{id}-"), format!("-pr-{id}")),
  };

  let repo = format!("repo:{}/{}", context.organization, context.repository);
  let trust_subject_patterns = [format!("{repo}:pull_request"), format!("{repo}:ref:{MAIN_BRANCH_REF}")];
  let access_tag = format!("{APPLICATION}{name_suffix}");

  Ok(ResolvedEnvironment {
    kind,
    name_prefix,
    name_suffix,
    trust_subject_patterns,
    access_tag,
  })
}
