pub mod cli;
pub mod cloudformation;
pub mod commands;
pub mod context;
pub mod environment;
pub mod error;
pub mod policy;
pub mod template;

use anyhow::Result;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, SdkConfig};
use aws_types::region::Region;
use clap::ValueEnum;
pub use cli::{Cli, Commands};
pub use context::{DeploymentTarget, EnvironmentContext};
pub use environment::{resolve_environment, EnvironmentKind, ResolvedEnvironment};
pub use error::ConfigurationError;
pub use policy::{build_access_scope, build_trust_condition, AccessScope, TrustCondition};
use serde::{Deserialize, Serialize};

/// Get the configuration to authn/authz with AWS that will be used across AWS clients
///
/// The deployment target's region takes precedence over the default provider chain
pub async fn get_sdk_config(region: Option<String>) -> Result<SdkConfig> {
  let region_provider = RegionProviderChain::first_try(region.map(Region::new)).or_default_provider();

  Ok(
    aws_config::defaults(BehaviorVersion::latest())
      .region(region_provider)
      .load()
      .await,
  )
}

/// Serialization format of the synthesized template
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum TemplateFormat {
  #[default]
  Json,
  Yaml,
}
