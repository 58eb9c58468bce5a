use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};

use crate::{
  context::DeploymentTarget,
  environment::{EnvironmentKind, ResolvedEnvironment, APPLICATION},
  policy::{
    self, AccessScope, Condition, Effect, PolicyDocument, PolicyStatement, Principal, StringEquals, POLICY_LITERALS,
  },
  TemplateFormat,
};

pub const FORMAT_VERSION: &str = "2010-09-09";

/// Stage the REST API is deployed to
pub const API_STAGE: &str = "prod";

/// AWS managed `CachingOptimized` cache policy
const CACHING_OPTIMIZED_POLICY_ID: &str = "658327ea-f89d-4fab-a63d-7e88639e58f6";

/// Wrap a string in `Fn::Sub` when it references a pseudo parameter or attribute
///
/// IAM policy literals (`${*}`, `${?}`, `${$}`) are not references. Inside `Fn::Sub` they are
/// written as `${!*}` so CloudFormation hands them to IAM unchanged.
pub fn sub(value: &str) -> Value {
  let references = POLICY_LITERALS
    .iter()
    .fold(value.to_owned(), |rest, literal| rest.replace(literal, ""));

  match references.contains("${") {
    true => {
      let escaped = POLICY_LITERALS.iter().fold(value.to_owned(), |escaped, literal| {
        escaped.replace(literal, &literal.replacen("${", "${!", 1))
      });
      json!({ "Fn::Sub": escaped })
    }
    false => Value::String(value.to_owned()),
  }
}

#[allow(clippy::ptr_arg)]
pub(crate) fn serialize_sub<S: Serializer>(value: &String, serializer: S) -> Result<S::Ok, S::Error> {
  sub(value).serialize(serializer)
}

#[allow(clippy::ptr_arg)]
pub(crate) fn serialize_subs<S: Serializer>(values: &Vec<String>, serializer: S) -> Result<S::Ok, S::Error> {
  serializer.collect_seq(values.iter().map(|v| sub(v)))
}

fn get_att(resource: &str, attribute: &str) -> Value {
  json!({ "Fn::GetAtt": [resource, attribute] })
}

fn reference(name: &str) -> Value {
  json!({ "Ref": name })
}

fn tag_list(tags: &BTreeMap<String, String>) -> Value {
  tags
    .iter()
    .map(|(key, value)| json!({ "Key": key, "Value": value }))
    .collect()
}

/// Location of the packaged Lambda bootstrap binary
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetLocation {
  pub code_bucket: String,
  pub code_key: String,
}

impl AssetLocation {
  pub const DEFAULT_CODE_KEY: &'static str = "wishlist_api/bootstrap.zip";

  /// Use the given bucket/key, defaulting to the shared artifacts bucket of the account
  pub fn new(target: &DeploymentTarget, code_bucket: Option<String>, code_key: Option<String>) -> Self {
    Self {
      code_bucket: code_bucket.unwrap_or_else(|| format!("{APPLICATION}-artifacts-{}", target.account())),
      code_key: code_key.unwrap_or_else(|| Self::DEFAULT_CODE_KEY.to_owned()),
    }
  }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
  #[serde(rename = "Type")]
  pub kind: String,

  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<String>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub deletion_policy: Option<String>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub update_replace_policy: Option<String>,

  pub properties: Value,
}

impl Resource {
  pub fn new(kind: &str, properties: Value) -> Self {
    Self {
      kind: kind.to_owned(),
      depends_on: Vec::new(),
      deletion_policy: None,
      update_replace_policy: None,
      properties,
    }
  }

  pub fn depends_on(mut self, names: &[&str]) -> Self {
    self.depends_on = names.iter().map(|n| n.to_string()).collect();
    self
  }

  /// Set both the deletion and update-replace policy
  pub fn retention(mut self, policy: &str) -> Self {
    self.deletion_policy = Some(policy.to_owned());
    self.update_replace_policy = Some(policy.to_owned());
    self
  }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
  pub description: String,
  pub value: Value,
}

/// CloudFormation template of the WishApp stack
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
  #[serde(rename = "AWSTemplateFormatVersion")]
  pub format_version: String,
  pub description: String,
  pub resources: BTreeMap<String, Resource>,
  pub outputs: BTreeMap<String, Output>,
}

impl Template {
  pub fn resource(&self, name: &str) -> Option<&Resource> {
    self.resources.get(name)
  }

  pub fn render(&self, format: TemplateFormat) -> Result<String> {
    let rendered = match format {
      TemplateFormat::Json => serde_json::to_string_pretty(self)?,
      TemplateFormat::Yaml => serde_yaml::to_string(self)?,
    };

    Ok(rendered)
  }
}

/// Stack name of an environment, e.g. `WishappStack-prod` or `WishappStack-pr-12`
pub fn default_stack_name(env: &ResolvedEnvironment) -> String {
  format!("WishappStack{}", env.name_suffix())
}

/// Synthesize the stack template for an environment
///
/// Production data stores are retained when removed from the stack; pull request environments
/// are torn down completely
pub fn synthesize(env: &ResolvedEnvironment, target: &DeploymentTarget, assets: &AssetLocation) -> Template {
  let scope = policy::build_access_scope(env, target);
  let tags = tag_list(&scope.tags());
  let retention = match env.kind() {
    EnvironmentKind::Production => "Retain",
    EnvironmentKind::PullRequest => "Delete",
  };

  let mut resources = BTreeMap::new();
  resources.insert("GitHubDeployRole".to_owned(), deploy_role(env, target, &scope, &tags));
  resources.extend(storage(env, target, &tags, retention));
  resources.extend(distribution(env, &tags));
  resources.extend(compute(env, assets, &tags));
  resources.extend(api(env, &tags));

  let outputs = BTreeMap::from([
    (
      "ApiUrl".to_owned(),
      Output {
        description: "Invoke URL of the WishApp REST API".to_owned(),
        value: sub(&format!(
          "https://${{WishApi}}.execute-api.${{AWS::Region}}.${{AWS::URLSuffix}}/{API_STAGE}/"
        )),
      },
    ),
    (
      "DeployRoleArn".to_owned(),
      Output {
        description: "Role assumed by GitHub Actions to deploy WishApp".to_owned(),
        value: get_att("GitHubDeployRole", "Arn"),
      },
    ),
    (
      "DistributionDomainName".to_owned(),
      Output {
        description: "Domain name of the assets distribution".to_owned(),
        value: get_att("AssetsDistribution", "DomainName"),
      },
    ),
    (
      "TableName".to_owned(),
      Output {
        description: "Name of the wishlist table".to_owned(),
        value: reference("WishlistTable"),
      },
    ),
  ]);

  Template {
    format_version: FORMAT_VERSION.to_owned(),
    description: format!("WishApp infrastructure ({}, {})", env.kind(), env.access_tag()),
    resources,
    outputs,
  }
}

fn deploy_role(env: &ResolvedEnvironment, target: &DeploymentTarget, scope: &AccessScope, tags: &Value) -> Resource {
  Resource::new(
    "AWS::IAM::Role",
    json!({
      "RoleName": env.resource_name(&format!("{APPLICATION}-github-deploy")),
      "Description": "Role for GitHub Actions to deploy WishApp",
      "AssumeRolePolicyDocument": policy::build_trust_policy(env, target),
      // Limits the window in which the issued credentials are valid
      "MaxSessionDuration": 3600,
      "Policies": [{
        "PolicyName": "WishappDeploy",
        "PolicyDocument": PolicyDocument::new(scope.statements()),
      }],
      "Tags": tags,
    }),
  )
}

fn storage(
  env: &ResolvedEnvironment,
  target: &DeploymentTarget,
  tags: &Value,
  retention: &str,
) -> Vec<(String, Resource)> {
  let bucket_policy = PolicyDocument::new(vec![PolicyStatement::allow(
    "CloudFrontRead",
    ["s3:GetObject"],
    ["${AssetsBucket.Arn}/*"],
  )
  .with_principal(Principal::Service("cloudfront.amazonaws.com".to_owned()))
  // Only the environment's own distribution may read through the origin access control
  .with_condition(Condition::Equals(StringEquals::source_arn(
    "arn:aws:cloudfront::${AWS::AccountId}:distribution/${AssetsDistribution}",
  )))]);

  vec![
    (
      "AssetsBucket".to_owned(),
      Resource::new(
        "AWS::S3::Bucket",
        json!({
          "BucketName": sub(&AccessScope::bucket_name(env, target)),
          "PublicAccessBlockConfiguration": {
            "BlockPublicAcls": true,
            "BlockPublicPolicy": true,
            "IgnorePublicAcls": true,
            "RestrictPublicBuckets": true,
          },
          "Tags": tags,
        }),
      )
      .retention(retention),
    ),
    (
      "AssetsBucketPolicy".to_owned(),
      Resource::new(
        "AWS::S3::BucketPolicy",
        json!({
          "Bucket": reference("AssetsBucket"),
          "PolicyDocument": bucket_policy,
        }),
      ),
    ),
    (
      "WishlistTable".to_owned(),
      Resource::new(
        "AWS::DynamoDB::Table",
        json!({
          "TableName": env.resource_name(&format!("{APPLICATION}-wishlist")),
          "AttributeDefinitions": [{ "AttributeName": "id", "AttributeType": "S" }],
          "KeySchema": [{ "AttributeName": "id", "KeyType": "HASH" }],
          "BillingMode": "PAY_PER_REQUEST",
          "Tags": tags,
        }),
      )
      .retention(retention),
    ),
    (
      "WishQueue".to_owned(),
      Resource::new(
        "AWS::SQS::Queue",
        json!({
          "QueueName": env.resource_name(&format!("{APPLICATION}-events")),
          "Tags": tags,
        }),
      ),
    ),
  ]
}

fn distribution(env: &ResolvedEnvironment, tags: &Value) -> Vec<(String, Resource)> {
  vec![
    (
      "AssetsOriginAccessControl".to_owned(),
      Resource::new(
        "AWS::CloudFront::OriginAccessControl",
        json!({
          "OriginAccessControlConfig": {
            "Name": env.resource_name(&format!("{APPLICATION}-assets")),
            "OriginAccessControlOriginType": "s3",
            "SigningBehavior": "always",
            "SigningProtocol": "sigv4",
          }
        }),
      ),
    ),
    (
      "AssetsDistribution".to_owned(),
      Resource::new(
        "AWS::CloudFront::Distribution",
        json!({
          "DistributionConfig": {
            "Enabled": true,
            "Comment": format!("{} assets", env.access_tag()),
            "DefaultRootObject": "index.html",
            "Origins": [{
              "Id": "assets",
              "DomainName": get_att("AssetsBucket", "RegionalDomainName"),
              "OriginAccessControlId": get_att("AssetsOriginAccessControl", "Id"),
              "S3OriginConfig": { "OriginAccessIdentity": "" },
            }],
            "DefaultCacheBehavior": {
              "TargetOriginId": "assets",
              "ViewerProtocolPolicy": "redirect-to-https",
              "CachePolicyId": CACHING_OPTIMIZED_POLICY_ID,
            },
          },
          "Tags": tags,
        }),
      ),
    ),
  ]
}

fn compute(env: &ResolvedEnvironment, assets: &AssetLocation, tags: &Value) -> Vec<(String, Resource)> {
  let assume = PolicyDocument::new(vec![PolicyStatement {
    sid: None,
    effect: Effect::Allow,
    principal: Some(Principal::Service("lambda.amazonaws.com".to_owned())),
    action: vec!["sts:AssumeRole".to_owned()],
    resource: Vec::new(),
    condition: None,
  }]);

  let data = PolicyDocument::new(vec![
    PolicyStatement::allow(
      "WishlistReadWrite",
      [
        "dynamodb:BatchGetItem",
        "dynamodb:BatchWriteItem",
        "dynamodb:ConditionCheckItem",
        "dynamodb:DeleteItem",
        "dynamodb:DescribeTable",
        "dynamodb:GetItem",
        "dynamodb:PutItem",
        "dynamodb:Query",
        "dynamodb:Scan",
        "dynamodb:UpdateItem",
      ],
      ["${WishlistTable.Arn}"],
    ),
    PolicyStatement::allow(
      "EventsSend",
      ["sqs:SendMessage", "sqs:GetQueueAttributes", "sqs:GetQueueUrl"],
      ["${WishQueue.Arn}"],
    ),
  ]);

  let handler = Resource::new(
    "AWS::Lambda::Function",
    json!({
      "FunctionName": env.resource_name(&format!("{APPLICATION}-api")),
      "Runtime": "provided.al2",
      "Handler": "doesnt.matter",
      "Role": get_att("WishHandlerRole", "Arn"),
      "Code": {
        "S3Bucket": sub(&assets.code_bucket),
        "S3Key": assets.code_key,
      },
      "Environment": {
        "Variables": {
          "TABLE_NAME": reference("WishlistTable"),
          "QUEUE_URL": reference("WishQueue"),
        }
      },
      "Tags": tags,
    }),
  )
  .depends_on(&["WishHandlerRole"]);

  vec![
    (
      "WishHandlerRole".to_owned(),
      Resource::new(
        "AWS::IAM::Role",
        json!({
          "AssumeRolePolicyDocument": assume,
          "ManagedPolicyArns": [
            sub("arn:${AWS::Partition}:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole"),
          ],
          "Policies": [{ "PolicyName": "WishlistData", "PolicyDocument": data }],
          "Tags": tags,
        }),
      ),
    ),
    ("WishHandler".to_owned(), handler),
  ]
}

fn api(env: &ResolvedEnvironment, tags: &Value) -> Vec<(String, Resource)> {
  let integration = json!({
    "Type": "AWS_PROXY",
    "IntegrationHttpMethod": "POST",
    "Uri": sub("arn:${AWS::Partition}:apigateway:${AWS::Region}:lambda:path/2015-03-31/functions/${WishHandler.Arn}/invocations"),
  });

  let method = |resource_id: Value| {
    Resource::new(
      "AWS::ApiGateway::Method",
      json!({
        "RestApiId": reference("WishApi"),
        "ResourceId": resource_id,
        "HttpMethod": "ANY",
        "AuthorizationType": "NONE",
        "Integration": integration,
      }),
    )
  };

  vec![
    (
      "WishApi".to_owned(),
      Resource::new(
        "AWS::ApiGateway::RestApi",
        json!({
          "Name": env.resource_name("WishApi"),
          "Tags": tags,
        }),
      ),
    ),
    (
      "WishApiProxyResource".to_owned(),
      Resource::new(
        "AWS::ApiGateway::Resource",
        json!({
          "RestApiId": reference("WishApi"),
          "ParentId": get_att("WishApi", "RootResourceId"),
          "PathPart": "{proxy+}",
        }),
      ),
    ),
    (
      "WishApiRootMethod".to_owned(),
      method(get_att("WishApi", "RootResourceId")),
    ),
    (
      "WishApiProxyMethod".to_owned(),
      method(reference("WishApiProxyResource")),
    ),
    (
      "WishApiDeployment".to_owned(),
      Resource::new(
        "AWS::ApiGateway::Deployment",
        json!({ "RestApiId": reference("WishApi") }),
      )
      .depends_on(&["WishApiRootMethod", "WishApiProxyMethod"]),
    ),
    (
      "WishApiStage".to_owned(),
      Resource::new(
        "AWS::ApiGateway::Stage",
        json!({
          "RestApiId": reference("WishApi"),
          "DeploymentId": reference("WishApiDeployment"),
          "StageName": API_STAGE,
          "Tags": tags,
        }),
      ),
    ),
    (
      "WishHandlerApiPermission".to_owned(),
      Resource::new(
        "AWS::Lambda::Permission",
        json!({
          "Action": "lambda:InvokeFunction",
          "FunctionName": get_att("WishHandler", "Arn"),
          "Principal": "apigateway.amazonaws.com",
          "SourceArn": sub("arn:${AWS::Partition}:execute-api:${AWS::Region}:${AWS::AccountId}:${WishApi}/*"),
        }),
      ),
    ),
  ]
}
