//! Synth command - Render the resource manifest.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tracing::info;

use stratus_core::{Manifest, ManifestFormat};

use super::StackArgs;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}

impl From<OutputFormat> for ManifestFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => ManifestFormat::Json,
            OutputFormat::Yaml => ManifestFormat::Yaml,
        }
    }
}

#[derive(Args)]
pub struct SynthArgs {
    #[command(flatten)]
    stack: StackArgs,

    /// Manifest format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Write the manifest to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

pub async fn execute(args: SynthArgs) -> Result<()> {
    let topology = args.stack.declare()?;
    let manifest = Manifest::from_graph(&topology.graph)?;
    let rendered = manifest.render(args.format.into())?;

    match &args.output {
        Some(path) => {
            tokio::fs::write(path, &rendered)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(
                "Wrote {} resources for {} to {}",
                topology.graph.len(),
                topology.graph.name(),
                path.display()
            );
        }
        None => println!("{}", rendered),
    }

    Ok(())
}
