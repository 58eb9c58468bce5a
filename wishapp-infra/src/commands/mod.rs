pub mod deploy;
pub mod synth;

use anyhow::Result;
use clap::Args;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
  context::{self, DeploymentTarget, EnvironmentContext},
  environment::{resolve_environment, ResolvedEnvironment},
  template::{self, AssetLocation, Template},
};

/// Inputs shared by every command that synthesizes the stack
#[derive(Args, Debug, Default, Serialize, Deserialize)]
pub struct StackInput {
  /// GitHub organization that owns the repository
  #[arg(long, env = "GITHUB_ORG")]
  pub github_org: Option<String>,

  /// GitHub repository name
  #[arg(long, env = "GITHUB_REPO")]
  pub github_repo: Option<String>,

  /// Context values in the form KEY=VALUE
  ///
  /// `prId=<id>` deploys a pull request preview environment instead of production
  #[arg(short, long = "context", value_name = "KEY=VALUE")]
  pub context: Vec<String>,

  /// AWS account ID to deploy into
  ///
  /// Defaults to the account CloudFormation deploys the stack into
  #[arg(long, env = "CDK_DEFAULT_ACCOUNT")]
  pub account: Option<String>,

  /// AWS region to deploy into
  #[arg(long, env = "CDK_DEFAULT_REGION")]
  pub region: Option<String>,

  /// Name of the CloudFormation stack
  ///
  /// Defaults to WishappStack-prod or WishappStack-pr-<id>
  #[arg(long)]
  pub stack_name: Option<String>,

  /// S3 bucket holding the packaged API function
  ///
  /// Defaults to wishapp-artifacts-<account>
  #[arg(long)]
  pub code_bucket: Option<String>,

  /// S3 key of the packaged API function
  #[arg(long)]
  pub code_key: Option<String>,
}

/// Stack ready to be rendered or deployed
#[derive(Debug)]
pub struct SynthesizedStack {
  pub name: String,
  pub environment: ResolvedEnvironment,
  pub target: DeploymentTarget,
  pub template: Template,
}

impl StackInput {
  /// Validate the inputs and resolve the environment
  ///
  /// Fails with a `ConfigurationError` before anything is synthesized
  pub fn resolve(&self) -> Result<(ResolvedEnvironment, DeploymentTarget)> {
    let context = context::parse_context(&self.context)?;
    let env_context =
      EnvironmentContext::from_inputs(self.github_org.as_deref(), self.github_repo.as_deref(), &context)?;
    let environment = resolve_environment(&env_context)?;
    debug!("Resolved environment: {environment:#?}");

    let target = DeploymentTarget::new(self.account.clone(), self.region.clone());

    Ok((environment, target))
  }

  /// Resolve the environment and synthesize its template
  pub fn synthesize(&self) -> Result<SynthesizedStack> {
    let (environment, target) = self.resolve()?;
    let assets = AssetLocation::new(&target, self.code_bucket.clone(), self.code_key.clone());
    let template = template::synthesize(&environment, &target, &assets);
    let name = self
      .stack_name
      .clone()
      .unwrap_or_else(|| template::default_stack_name(&environment));

    info!(
      "Synthesized {name} for {} environment {}",
      environment.kind(),
      environment.access_tag()
    );

    Ok(SynthesizedStack {
      name,
      environment,
      target,
      template,
    })
  }
}
