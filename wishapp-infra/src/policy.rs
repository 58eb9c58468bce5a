//! IAM documents for the GitHub Actions deploy role
//!
//! The trust side admits only OIDC tokens issued for the configured repository and the STS
//! audience. The permission side scopes every statement to resources of the same environment,
//! either through the environment's name prefix, the deployment account/region, or the
//! `Environment` resource tag.
use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::{
  context::DeploymentTarget,
  environment::{ResolvedEnvironment, APPLICATION},
  template::{serialize_sub, serialize_subs, sub},
};

/// Issuer host of the GitHub Actions OIDC provider
pub const OIDC_PROVIDER_HOST: &str = "token.actions.githubusercontent.com";

/// Audience GitHub Actions requests when exchanging its token with STS
pub const OIDC_AUDIENCE: &str = "sts.amazonaws.com";

/// Tag key carrying the environment's access tag on every provisioned resource
pub const ACCESS_TAG_KEY: &str = "Environment";

pub const POLICY_VERSION: &str = "2012-10-17";

/// IAM policy variables standing for a literal `*`, `?` and `$` in resource patterns
pub const POLICY_LITERALS: [&str; 3] = ["${*}", "${?}", "${$}"];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Effect {
  Allow,
}

/// `StringEquals` condition on the token audience claim
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AudienceCondition {
  #[serde(rename = "token.actions.githubusercontent.com:aud")]
  audience: String,
}

/// `StringLike` condition on the token subject claim
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubjectCondition {
  #[serde(rename = "token.actions.githubusercontent.com:sub")]
  subjects: Vec<String>,
}

/// Condition block of the deploy role's trust policy
///
/// Both conditions must hold for a token to be accepted. Only built by [`build_trust_condition`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TrustCondition {
  #[serde(rename = "StringEquals")]
  audience: AudienceCondition,

  #[serde(rename = "StringLike")]
  subject: SubjectCondition,
}

impl TrustCondition {
  pub fn audience(&self) -> &str {
    &self.audience.audience
  }

  pub fn subjects(&self) -> &[String] {
    &self.subject.subjects
  }
}

/// Escape the IAM wildcard characters of an opaque value so it only matches itself in a pattern
pub fn policy_literal(value: &str) -> String {
  value
    .chars()
    .map(|c| match c {
      '*' => "${*}".to_owned(),
      '?' => "${?}".to_owned(),
      '$' => "${$}".to_owned(),
      c => c.to_string(),
    })
    .collect()
}

/// Build the trust condition: fixed STS audience and exactly the environment's subject patterns
pub fn build_trust_condition(env: &ResolvedEnvironment) -> TrustCondition {
  TrustCondition {
    audience: AudienceCondition {
      audience: OIDC_AUDIENCE.to_owned(),
    },
    subject: SubjectCondition {
      subjects: env.trust_subject_patterns().to_vec(),
    },
  }
}

/// `StringEquals` condition on request or resource context keys
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StringEquals {
  #[serde(rename = "StringEquals")]
  equals: BTreeMap<String, Value>,
}

impl StringEquals {
  pub fn resource_tag(key: &str, value: &str) -> Self {
    Self {
      equals: BTreeMap::from([(format!("aws:ResourceTag/{key}"), Value::String(value.to_owned()))]),
    }
  }

  /// Restrict a service principal to requests made on behalf of the given resource
  pub fn source_arn(arn: &str) -> Self {
    Self {
      equals: BTreeMap::from([("AWS:SourceArn".to_owned(), sub(arn))]),
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Condition {
  Trust(TrustCondition),
  Equals(StringEquals),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum Principal {
  #[serde(serialize_with = "serialize_sub")]
  Federated(String),
  Service(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub sid: Option<String>,

  pub effect: Effect,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub principal: Option<Principal>,

  pub action: Vec<String>,

  #[serde(skip_serializing_if = "Vec::is_empty", serialize_with = "serialize_subs")]
  pub resource: Vec<String>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub condition: Option<Condition>,
}

impl PolicyStatement {
  /// An `Allow` statement for the given actions on the given resources
  pub fn allow<A, R>(sid: &str, actions: A, resources: R) -> Self
  where
    A: IntoIterator,
    A::Item: Into<String>,
    R: IntoIterator,
    R::Item: Into<String>,
  {
    Self {
      sid: Some(sid.to_owned()),
      effect: Effect::Allow,
      principal: None,
      action: actions.into_iter().map(Into::into).collect(),
      resource: resources.into_iter().map(Into::into).collect(),
      condition: None,
    }
  }

  pub fn with_principal(mut self, principal: Principal) -> Self {
    self.principal = Some(principal);
    self
  }

  pub fn with_condition(mut self, condition: Condition) -> Self {
    self.condition = Some(condition);
    self
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
  pub version: String,
  pub statement: Vec<PolicyStatement>,
}

impl PolicyDocument {
  pub fn new(statement: Vec<PolicyStatement>) -> Self {
    Self {
      version: POLICY_VERSION.to_owned(),
      statement,
    }
  }
}

/// ARN of the account's GitHub Actions OIDC provider
pub fn oidc_provider_arn(target: &DeploymentTarget) -> String {
  format!("arn:aws:iam::{}:oidc-provider/{OIDC_PROVIDER_HOST}", target.account())
}

/// Assume-role policy letting GitHub Actions workflows of the repository assume the deploy role
pub fn build_trust_policy(env: &ResolvedEnvironment, target: &DeploymentTarget) -> PolicyDocument {
  PolicyDocument::new(vec![PolicyStatement {
    sid: None,
    effect: Effect::Allow,
    principal: Some(Principal::Federated(oidc_provider_arn(target))),
    action: vec!["sts:AssumeRoleWithWebIdentity".to_owned()],
    resource: Vec::new(),
    condition: Some(Condition::Trust(build_trust_condition(env))),
  }])
}

/// Resource patterns and tag that confine the deploy role to one environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessScope {
  pub tag_key: String,
  pub tag_value: String,
  pub bucket: Vec<String>,
  pub table: Vec<String>,
  pub distribution: Vec<String>,
  pub function: Vec<String>,
  pub queue: Vec<String>,
}

impl AccessScope {
  /// Name of the assets bucket; bucket names are global so the account is part of it
  pub fn bucket_name(env: &ResolvedEnvironment, target: &DeploymentTarget) -> String {
    env.resource_name(&format!("{APPLICATION}-assets-{}", target.account()))
  }

  /// Tags attached to every provisioned resource of the environment
  pub fn tags(&self) -> BTreeMap<String, String> {
    BTreeMap::from([
      (self.tag_key.clone(), self.tag_value.clone()),
      ("Project".to_owned(), APPLICATION.to_owned()),
    ])
  }

  /// Every resource pattern across all statements
  pub fn patterns(&self) -> impl Iterator<Item = &String> {
    self
      .bucket
      .iter()
      .chain(&self.table)
      .chain(&self.distribution)
      .chain(&self.function)
      .chain(&self.queue)
  }

  /// Permission statements of the deploy role
  pub fn statements(&self) -> Vec<PolicyStatement> {
    vec![
      PolicyStatement::allow(
        "AssetsBucket",
        ["s3:PutObject", "s3:GetObject", "s3:ListBucket", "s3:DeleteObject"],
        self.bucket.clone(),
      ),
      PolicyStatement::allow(
        "WishlistTable",
        [
          "dynamodb:PutItem",
          "dynamodb:GetItem",
          "dynamodb:UpdateItem",
          "dynamodb:DeleteItem",
          "dynamodb:Query",
          "dynamodb:Scan",
        ],
        self.table.clone(),
      ),
      // Distribution ids are generated, so ownership is established through the tag
      PolicyStatement::allow(
        "Distribution",
        [
          "cloudfront:CreateInvalidation",
          "cloudfront:GetDistribution",
          "cloudfront:UpdateDistribution",
        ],
        self.distribution.clone(),
      )
      .with_condition(Condition::Equals(StringEquals::resource_tag(&self.tag_key, &self.tag_value))),
      PolicyStatement::allow(
        "Functions",
        [
          "lambda:UpdateFunctionCode",
          "lambda:UpdateFunctionConfiguration",
          "lambda:GetFunction",
          "lambda:InvokeFunction",
        ],
        self.function.clone(),
      ),
      PolicyStatement::allow(
        "Queues",
        [
          "sqs:SendMessage",
          "sqs:ReceiveMessage",
          "sqs:DeleteMessage",
          "sqs:GetQueueAttributes",
        ],
        self.queue.clone(),
      ),
    ]
  }
}

/// Build the access scope for an environment in the given account/region
pub fn build_access_scope(env: &ResolvedEnvironment, target: &DeploymentTarget) -> AccessScope {
  let account = target.account();
  let region = target.region();
  let prefix = policy_literal(env.name_prefix());
  let bucket = format!("{prefix}{APPLICATION}-assets-{account}");

  AccessScope {
    tag_key: ACCESS_TAG_KEY.to_owned(),
    tag_value: env.access_tag().to_owned(),
    bucket: vec![format!("arn:aws:s3:::{bucket}"), format!("arn:aws:s3:::{bucket}/*")],
    table: vec![format!("arn:aws:dynamodb:{region}:{account}:table/{prefix}{APPLICATION}-*")],
    distribution: vec![format!("arn:aws:cloudfront::{account}:distribution/*")],
    function: vec![format!(
      "arn:aws:lambda:{region}:{account}:function:{prefix}{APPLICATION}-*"
    )],
    queue: vec![format!("arn:aws:sqs:{region}:{account}:{prefix}{APPLICATION}-*")],
  }
}
