use std::process;

use anyhow::Result;
use clap::Parser;
use tracing_log::AsTrace;
use tracing_subscriber::FmtSubscriber;
use wishapp_infra::{Cli, Commands, ConfigurationError};

#[cfg(not(tarpaulin_include))]
#[tokio::main]
async fn main() {
  let cli = Cli::parse();
  let subscriber = FmtSubscriber::builder()
    .with_max_level(cli.verbose.log_level_filter().as_trace())
    .without_time()
    .with_ansi(!cli.no_color)
    .with_writer(std::io::stderr)
    .finish();
  tracing::subscriber::set_global_default(subscriber).expect("Setting default subscriber failed");

  let result: Result<()> = match &cli.command {
    Commands::Synth(synth) => synth.synth().await,
    Commands::Deploy(deploy) => deploy.deploy().await,
  };

  if let Err(err) = result {
    match err.downcast_ref::<ConfigurationError>() {
      Some(config_err) => {
        eprintln!("Configuration error: {config_err}");
        process::exit(1);
      }
      None => {
        eprintln!("{err:#}");
        process::exit(2);
      }
    }
  }
}
