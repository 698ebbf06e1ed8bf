//! CLI command definitions.
//!
//! Every subcommand works on one stack, declared from the built-in
//! defaults or a config file plus command-line overrides.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tracing::debug;

use stratus_core::check_stack_name;
use stratus_engine::LocalEngine;
use stratus_iac::{declare_topology, StackConfig, Topology};

pub mod apply;
pub mod destroy;
pub mod plan;
pub mod state;
pub mod synth;
pub mod validate;

/// Stratus - declarative web tier topologies
#[derive(Parser)]
#[command(name = "stratus")]
#[command(version, about = "Stratus - declarative web tier topologies")]
#[command(long_about = r#"
Stratus declares a load-balanced, autoscaled web tier backed by a managed
relational database cluster, renders it as a manifest, and converges a
local state snapshot onto it.

COMMANDS:
  synth     → Render the resource manifest
  validate  → Run declaration and topology checks
  plan      → Show the change set against stored state
  apply     → Realize the stack through the local engine
  destroy   → Tear the stack down
  state     → Show the stored state snapshot

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Declaration or validation failure
  5 - Apply error
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render the resource manifest
    Synth(synth::SynthArgs),

    /// Run declaration and topology checks
    Validate(validate::ValidateArgs),

    /// Show what an apply would change
    Plan(plan::PlanArgs),

    /// Realize the stack
    Apply(apply::ApplyArgs),

    /// Tear the stack down
    Destroy(destroy::DestroyArgs),

    /// Show the stored state snapshot
    State(state::StateArgs),
}

/// Arguments shared by every command.
#[derive(Args, Debug, Clone)]
pub struct StackArgs {
    /// Stack config file (.yaml, .yml or .toml)
    #[arg(short, long, env = "STRATUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the stack name
    #[arg(long)]
    pub stack_name: Option<String>,

    /// Override the region
    #[arg(long)]
    pub region: Option<String>,

    /// Stack tag as KEY=VALUE (repeatable)
    #[arg(long = "tag", value_name = "KEY=VALUE")]
    pub tags: Vec<String>,

    /// Directory holding state snapshots
    #[arg(long, default_value = ".stratus", env = "STRATUS_STATE_DIR")]
    pub state_dir: PathBuf,
}

impl StackArgs {
    /// Config file (or defaults) with the command-line overrides applied.
    pub fn load_config(&self) -> Result<StackConfig> {
        let mut config = match &self.config {
            Some(path) => StackConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => StackConfig::default(),
        };
        if let Some(name) = &self.stack_name {
            config = config.with_stack_name(name);
        }
        if let Some(region) = &self.region {
            config = config.with_region(region);
        }
        let config = config.with_tag_overrides(&self.tags)?;
        debug!("Using stack {} in {}", config.stack_name, config.region);
        Ok(config)
    }

    pub fn declare(&self) -> Result<Topology> {
        let config = self.load_config()?;
        let topology = declare_topology(&config)
            .with_context(|| format!("Failed to declare stack {}", config.stack_name))?;
        Ok(topology)
    }

    /// Stack name without declaring the topology.
    pub fn stack_name(&self) -> Result<String> {
        let name = self.load_config()?.stack_name;
        check_stack_name(&name)?;
        Ok(name)
    }

    pub fn engine(&self) -> LocalEngine {
        LocalEngine::new(&self.state_dir)
    }
}

/// Topology checks that did not pass.
#[derive(Error, Debug)]
#[error("Validation failed: {failed} of {total} checks did not pass")]
pub struct ValidationFailed {
    pub failed: usize,
    pub total: usize,
}
