use std::time::Duration;

use anyhow::{bail, Result};
use aws_config::SdkConfig;
use aws_sdk_cloudformation::{
  config::{self, retry::RetryConfig},
  error::ProvideErrorMetadata,
  types::{Capability, Stack, StackStatus},
  Client,
};
use tracing::{debug, info, warn};

/// Interval between stack status polls
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Give up waiting on the stack after this many polls (~30 minutes at the default interval)
const MAX_POLLS: u32 = 180;

/// Get the CloudFormation client
pub fn get_client(config: &SdkConfig) -> Client {
  Client::from_conf(
    // Start with the shared environment configuration
    config::Builder::from(config)
      // Set max attempts
      .retry_config(RetryConfig::standard().with_max_attempts(3))
      .build(),
  )
}

/// Where a stack operation stands, derived from its status
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StackProgress {
  InProgress,
  Succeeded,
  Failed,
}

impl StackProgress {
  pub fn from_status(status: &str) -> Self {
    match status {
      "CREATE_COMPLETE" | "UPDATE_COMPLETE" | "IMPORT_COMPLETE" => StackProgress::Succeeded,
      s if s.ends_with("_IN_PROGRESS") => StackProgress::InProgress,
      _ => StackProgress::Failed,
    }
  }
}

/// Stack to create or update
#[derive(Clone, Debug)]
pub struct DeployRequest {
  pub stack_name: String,
  pub template_body: String,
  pub poll_interval: Duration,
}

impl DeployRequest {
  pub fn new(stack_name: impl Into<String>, template_body: impl Into<String>) -> Self {
    Self {
      stack_name: stack_name.into(),
      template_body: template_body.into(),
      poll_interval: POLL_INTERVAL,
    }
  }

  pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
    self.poll_interval = poll_interval;
    self
  }
}

fn status_of(stack: &Stack) -> Option<StackStatus> {
  stack.stack_status.clone().into()
}

/// Describe the stack, returning `None` when it does not exist yet
async fn describe_stack(client: &Client, name: &str) -> Result<Option<Stack>> {
  match client.describe_stacks().stack_name(name).send().await {
    Ok(output) => Ok(output.stacks.unwrap_or_default().into_iter().next()),
    Err(err) => {
      let err = err.into_service_error();
      let missing = err.message().map_or(false, |m| m.contains("does not exist"));
      match missing {
        true => Ok(None),
        false => Err(err.into()),
      }
    }
  }
}

async fn create_stack(client: &Client, request: &DeployRequest) -> Result<()> {
  let output = client
    .create_stack()
    .stack_name(&request.stack_name)
    .template_body(&request.template_body)
    .capabilities(Capability::CapabilityNamedIam)
    .send()
    .await
    .map_err(|e| e.into_service_error())?;

  info!(
    "Creating stack {}",
    output.stack_id().unwrap_or(request.stack_name.as_str())
  );
  Ok(())
}

/// Update the stack, returning `false` when the template introduces no changes
async fn update_stack(client: &Client, request: &DeployRequest) -> Result<bool> {
  let result = client
    .update_stack()
    .stack_name(&request.stack_name)
    .template_body(&request.template_body)
    .capabilities(Capability::CapabilityNamedIam)
    .send()
    .await;

  match result {
    Ok(output) => {
      info!(
        "Updating stack {}",
        output.stack_id().unwrap_or(request.stack_name.as_str())
      );
      Ok(true)
    }
    Err(err) => {
      let err = err.into_service_error();
      let unchanged = err
        .message()
        .map_or(false, |m| m.contains("No updates are to be performed"));
      match unchanged {
        true => Ok(false),
        false => Err(err.into()),
      }
    }
  }
}

/// Poll the stack until it leaves the in-progress states
///
/// The SDK waiters only report that a terminal state was not the expected one. Polling directly
/// keeps the final status and its `StackStatusReason` for the error.
async fn wait_for_stack(client: &Client, name: &str, poll_interval: Duration) -> Result<StackStatus> {
  for _ in 0..MAX_POLLS {
    tokio::time::sleep(poll_interval).await;

    let Some(stack) = describe_stack(client, name).await? else {
      bail!("Stack {name} disappeared while waiting for it to settle");
    };
    let Some(status) = status_of(&stack) else {
      continue;
    };
    debug!("Stack {name} status: {}", status.as_str());

    match StackProgress::from_status(status.as_str()) {
      StackProgress::InProgress => continue,
      StackProgress::Succeeded => return Ok(status),
      StackProgress::Failed => {
        let reason = stack.stack_status_reason().unwrap_or("no reason reported");
        bail!("Stack {name} finished in {}: {reason}", status.as_str());
      }
    }
  }

  bail!("Timed out waiting for stack {name}")
}

/// Create the stack or update it in place, then wait for the operation to finish
pub async fn deploy_stack(client: &Client, request: &DeployRequest) -> Result<()> {
  let name = request.stack_name.as_str();

  match describe_stack(client, name).await? {
    None => create_stack(client, request).await?,
    Some(stack) => {
      if let Some(status) = status_of(&stack) {
        if StackProgress::from_status(status.as_str()) == StackProgress::InProgress {
          bail!("Stack {name} is busy ({}), retry once it settles", status.as_str());
        }
      }

      if !update_stack(client, request).await? {
        warn!("Stack {name} is already up to date");
        return Ok(());
      }
    }
  }

  let status = wait_for_stack(client, name, request.poll_interval).await?;
  info!("Stack {name} deployed: {}", status.as_str());

  Ok(())
}

#[cfg(test)]
mod tests {
  use aws_sdk_cloudformation::{
    error::ErrorMetadata,
    operation::{
      create_stack::CreateStackOutput,
      describe_stacks::{DescribeStacksError, DescribeStacksOutput},
      update_stack::{UpdateStackError, UpdateStackOutput},
    },
    primitives::DateTime,
  };
  use aws_smithy_mocks::{mock, mock_client, Rule, RuleMode};
  use rstest::*;

  use super::*;

  const STACK: &str = "WishappStack-pr-7";
  const STACK_ID: &str = "arn:aws:cloudformation:eu-west-1:123456789012:stack/WishappStack-pr-7/1";

  /// `StackBuilder::build` is fallible when the SDK marks members as required
  trait BuiltStack {
    fn into_stack(self) -> Stack;
  }

  impl BuiltStack for Stack {
    fn into_stack(self) -> Stack {
      self
    }
  }

  impl<E: std::fmt::Debug> BuiltStack for std::result::Result<Stack, E> {
    fn into_stack(self) -> Stack {
      self.unwrap()
    }
  }

  fn request() -> DeployRequest {
    DeployRequest::new(STACK, "{}").with_poll_interval(Duration::ZERO)
  }

  fn validation_error(message: &str) -> ErrorMetadata {
    ErrorMetadata::builder().code("ValidationError").message(message).build()
  }

  fn stack_missing() -> Rule {
    mock!(Client::describe_stacks)
      .match_requests(|req| req.stack_name() == Some(STACK))
      .then_error(|| {
        DescribeStacksError::generic(validation_error("Stack with id WishappStack-pr-7 does not exist"))
      })
  }

  fn stack_in(status: StackStatus, reason: Option<&'static str>) -> Rule {
    mock!(Client::describe_stacks)
      .match_requests(|req| req.stack_name() == Some(STACK))
      .then_output(move || {
        let stack = Stack::builder()
          .stack_id(STACK_ID)
          .stack_name(STACK)
          .creation_time(DateTime::from_secs(0))
          .stack_status(status.clone())
          .set_stack_status_reason(reason.map(str::to_owned))
          .build()
          .into_stack();
        DescribeStacksOutput::builder().stacks(stack).build()
      })
  }

  fn created() -> Rule {
    mock!(Client::create_stack)
      .match_requests(|req| req.stack_name() == Some(STACK) && req.template_body() == Some("{}"))
      .then_output(|| CreateStackOutput::builder().stack_id(STACK_ID).build())
  }

  fn updated() -> Rule {
    mock!(Client::update_stack)
      .match_requests(|req| req.stack_name() == Some(STACK))
      .then_output(|| UpdateStackOutput::builder().stack_id(STACK_ID).build())
  }

  fn update_unchanged() -> Rule {
    mock!(Client::update_stack)
      .then_error(|| UpdateStackError::generic(validation_error("No updates are to be performed.")))
  }

  #[tokio::test]
  async fn it_creates_missing_stack() {
    let (missing, create, in_progress, complete) = (
      stack_missing(),
      created(),
      stack_in(StackStatus::CreateInProgress, None),
      stack_in(StackStatus::CreateComplete, None),
    );
    let client = mock_client!(
      aws_sdk_cloudformation,
      RuleMode::Sequential,
      [&missing, &create, &in_progress, &complete]
    );

    deploy_stack(&client, &request()).await.unwrap();
    assert_eq!(create.num_calls(), 1);
    assert_eq!(complete.num_calls(), 1);
  }

  #[tokio::test]
  async fn it_updates_existing_stack() {
    let (existing, update, complete) = (
      stack_in(StackStatus::CreateComplete, None),
      updated(),
      stack_in(StackStatus::UpdateComplete, None),
    );
    let client = mock_client!(aws_sdk_cloudformation, RuleMode::Sequential, [&existing, &update, &complete]);

    deploy_stack(&client, &request()).await.unwrap();
    assert_eq!(update.num_calls(), 1);
  }

  #[tokio::test]
  async fn it_accepts_update_without_changes() {
    let (existing, unchanged) = (stack_in(StackStatus::UpdateComplete, None), update_unchanged());
    let client = mock_client!(aws_sdk_cloudformation, RuleMode::Sequential, [&existing, &unchanged]);

    deploy_stack(&client, &request()).await.unwrap();
    assert_eq!(unchanged.num_calls(), 1);
  }

  #[tokio::test]
  async fn it_reports_rolled_back_stack() {
    let (missing, create, rolled_back) = (
      stack_missing(),
      created(),
      stack_in(StackStatus::RollbackComplete, Some("Bucket already exists")),
    );
    let client = mock_client!(aws_sdk_cloudformation, RuleMode::Sequential, [&missing, &create, &rolled_back]);

    let err = deploy_stack(&client, &request()).await.unwrap_err().to_string();
    assert!(err.contains("ROLLBACK_COMPLETE"), "{err}");
    assert!(err.contains("Bucket already exists"), "{err}");
  }

  #[tokio::test]
  async fn it_refuses_busy_stack() {
    let busy = stack_in(StackStatus::UpdateInProgress, None);
    let client = mock_client!(aws_sdk_cloudformation, RuleMode::Sequential, [&busy]);

    let err = deploy_stack(&client, &request()).await.unwrap_err().to_string();
    assert!(err.contains("is busy (UPDATE_IN_PROGRESS)"), "{err}");
  }

  #[tokio::test]
  async fn it_surfaces_other_errors() {
    let denied = mock!(Client::describe_stacks).then_error(|| {
      DescribeStacksError::generic(
        ErrorMetadata::builder()
          .code("AccessDenied")
          .message("User is not authorized to perform: cloudformation:DescribeStacks")
          .build(),
      )
    });
    let client = mock_client!(aws_sdk_cloudformation, RuleMode::Sequential, [&denied]);

    assert!(deploy_stack(&client, &request()).await.is_err());
  }

  #[test]
  fn it_defaults_poll_interval() {
    let request = DeployRequest::new(STACK, "{}");
    assert_eq!(request.poll_interval, POLL_INTERVAL);
    assert_eq!(request.with_poll_interval(Duration::ZERO).poll_interval, Duration::ZERO);
  }

  #[rstest]
  #[case("CREATE_COMPLETE", StackProgress::Succeeded)]
  #[case("UPDATE_COMPLETE", StackProgress::Succeeded)]
  #[case("CREATE_IN_PROGRESS", StackProgress::InProgress)]
  #[case("UPDATE_COMPLETE_CLEANUP_IN_PROGRESS", StackProgress::InProgress)]
  #[case("UPDATE_ROLLBACK_IN_PROGRESS", StackProgress::InProgress)]
  #[case("ROLLBACK_COMPLETE", StackProgress::Failed)]
  #[case("UPDATE_ROLLBACK_COMPLETE", StackProgress::Failed)]
  #[case("CREATE_FAILED", StackProgress::Failed)]
  #[case("DELETE_COMPLETE", StackProgress::Failed)]
  fn it_classifies_stack_status(#[case] status: &str, #[case] expected: StackProgress) {
    assert_eq!(StackProgress::from_status(status), expected);
  }
}
