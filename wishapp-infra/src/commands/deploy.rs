use anyhow::Result;
use clap::Args;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
  cloudformation::{self, DeployRequest},
  commands::StackInput,
  TemplateFormat,
};

#[derive(Args, Debug, Default, Serialize, Deserialize)]
pub struct DeployInput {
  #[clap(flatten)]
  pub stack: StackInput,

  /// Synthesize the stack without applying it
  ///
  /// Useful for debugging - prints the stack name and the template that would be deployed
  #[arg(long)]
  pub dry_run: bool,
}

impl DeployInput {
  /// Synthesize the template and hand it to CloudFormation
  pub async fn deploy(&self) -> Result<()> {
    let stack = self.stack.synthesize()?;
    let template_body = stack.template.render(TemplateFormat::Json)?;

    if self.dry_run {
      println!("{}", stack.name);
      println!("{template_body}");
      return Ok(());
    }

    let config = crate::get_sdk_config(stack.target.region.clone()).await?;
    let client = cloudformation::get_client(&config);
    let request = DeployRequest::new(stack.name, template_body);

    info!("Deploying {} ({})", request.stack_name, stack.environment.access_tag());
    cloudformation::deploy_stack(&client, &request).await
  }
}
