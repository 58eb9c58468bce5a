use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{commands::StackInput, TemplateFormat};

#[derive(Args, Debug, Default, Serialize, Deserialize)]
pub struct SynthInput {
  #[clap(flatten)]
  pub stack: StackInput,

  /// Format of the rendered template
  #[arg(long, value_enum, default_value_t)]
  pub format: TemplateFormat,

  /// Write the template to this file instead of stdout
  #[arg(short, long)]
  pub output: Option<PathBuf>,
}

impl SynthInput {
  /// Render the template without touching AWS
  pub async fn synth(&self) -> Result<()> {
    let stack = self.stack.synthesize()?;
    let rendered = stack.template.render(self.format)?;

    match &self.output {
      Some(path) => {
        fs::write(path, rendered).with_context(|| format!("Unable to write template to {}", path.display()))?;
        info!("Wrote {} template to {}", stack.name, path.display());
      }
      None => println!("{rendered}"),
    }

    Ok(())
  }
}
