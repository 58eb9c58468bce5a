use std::collections::BTreeMap;

use crate::error::ConfigurationError;

/// Context key that selects a pull request preview environment
pub const PR_CONTEXT_KEY: &str = "prId";

/// CloudFormation pseudo parameter used when no account is supplied
pub const ACCOUNT_PLACEHOLDER: &str = "${AWS::AccountId}";

/// CloudFormation pseudo parameter used when no region is supplied
pub const REGION_PLACEHOLDER: &str = "${AWS::Region}";

/// Inputs that identify the repository being deployed and, optionally, the pull request
///
/// Constructed once at process entry from flags/environment and passed by value into the resolver
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvironmentContext {
  /// GitHub organization that owns the repository
  pub organization: String,

  /// GitHub repository name
  pub repository: String,

  /// Pull request identifier; opaque token, presence selects a preview environment
  pub pull_request_id: Option<String>,
}

impl EnvironmentContext {
  pub fn new(organization: impl Into<String>, repository: impl Into<String>) -> Self {
    Self {
      organization: organization.into(),
      repository: repository.into(),
      pull_request_id: None,
    }
  }

  pub fn with_pull_request(mut self, id: impl Into<String>) -> Self {
    self.pull_request_id = Some(id.into());
    self
  }

  /// Build the context from optional raw inputs, failing on any required value that is absent
  pub fn from_inputs(
    organization: Option<&str>,
    repository: Option<&str>,
    context: &BTreeMap<String, String>,
  ) -> Result<Self, ConfigurationError> {
    let organization = organization.ok_or(ConfigurationError::Missing { field: "GITHUB_ORG" })?;
    let repository = repository.ok_or(ConfigurationError::Missing { field: "GITHUB_REPO" })?;

    Ok(Self {
      organization: organization.to_owned(),
      repository: repository.to_owned(),
      pull_request_id: context.get(PR_CONTEXT_KEY).cloned(),
    })
  }
}

/// Account and region the stack is deployed into
///
/// Both are consumed opaquely; when absent the CloudFormation pseudo parameters are used and
/// resolved by CloudFormation at deploy time
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeploymentTarget {
  pub account: Option<String>,
  pub region: Option<String>,
}

impl DeploymentTarget {
  pub fn new(account: Option<String>, region: Option<String>) -> Self {
    Self { account, region }
  }

  pub fn account(&self) -> &str {
    self.account.as_deref().unwrap_or(ACCOUNT_PLACEHOLDER)
  }

  pub fn region(&self) -> &str {
    self.region.as_deref().unwrap_or(REGION_PLACEHOLDER)
  }
}

/// Parse `KEY=VALUE` context entries, as passed with `--context`
///
/// Later entries override earlier ones. The value may be empty (`prId=`), which is rejected
/// later by the resolver rather than silently ignored here
pub fn parse_context<S: AsRef<str>>(entries: &[S]) -> Result<BTreeMap<String, String>, ConfigurationError> {
  entries
    .iter()
    .map(|entry| {
      let entry = entry.as_ref();
      match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(ConfigurationError::InvalidContext {
          entry: entry.to_owned(),
        }),
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use rstest::*;

  use super::*;

  #[test]
  fn it_parses_context_entries() {
    let context = parse_context(&["prId=123", "stage=dev", "prId=456"]).unwrap();
    assert_eq!(context.get("prId").map(String::as_str), Some("456"));
    assert_eq!(context.get("stage").map(String::as_str), Some("dev"));
  }

  #[test]
  fn it_keeps_empty_context_values() {
    let context = parse_context(&["prId="]).unwrap();
    assert_eq!(context.get("prId").map(String::as_str), Some(""));
  }

  #[rstest]
  #[case("prId")]
  #[case("=123")]
  #[case("")]
  fn it_rejects_malformed_context(#[case] entry: &str) {
    let result = parse_context(&[entry]);
    assert_eq!(
      result,
      Err(ConfigurationError::InvalidContext {
        entry: entry.to_owned()
      })
    );
  }

  #[test]
  fn it_reports_missing_organization() {
    let result = EnvironmentContext::from_inputs(None, Some("wishapp"), &BTreeMap::new());
    assert_eq!(result, Err(ConfigurationError::Missing { field: "GITHUB_ORG" }));
  }

  #[test]
  fn it_reports_missing_repository() {
    let result = EnvironmentContext::from_inputs(Some("morgaesis"), None, &BTreeMap::new());
    assert_eq!(result, Err(ConfigurationError::Missing { field: "GITHUB_REPO" }));
  }

  #[test]
  fn it_reads_pull_request_from_context() {
    let context = parse_context(&["prId=42"]).unwrap();
    let result = EnvironmentContext::from_inputs(Some("morgaesis"), Some("wishapp"), &context).unwrap();
    assert_eq!(result, EnvironmentContext::new("morgaesis", "wishapp").with_pull_request("42"));
  }

  #[test]
  fn it_falls_back_to_pseudo_parameters() {
    let target = DeploymentTarget::default();
    assert_eq!(target.account(), "${AWS::AccountId}");
    assert_eq!(target.region(), "${AWS::Region}");

    let target = DeploymentTarget::new(Some("123456789012".to_owned()), Some("eu-west-1".to_owned()));
    assert_eq!(target.account(), "123456789012");
    assert_eq!(target.region(), "eu-west-1");
  }
}
