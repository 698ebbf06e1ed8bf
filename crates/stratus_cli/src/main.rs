//! Stratus CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Declaration or validation failure
//! - 5: Apply error

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stratus_core::DeclarationError;
use stratus_engine::EngineError;
use stratus_iac::ConfigError;

mod commands;

use commands::{Cli, Commands, ValidationFailed};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const DECLARATION_FAILURE: u8 = 3;
    pub const APPLY_ERROR: u8 = 5;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let directives = if cli.verbose {
        "stratus=debug,warn"
    } else if cli.quiet {
        "error"
    } else {
        "stratus=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));
    let log_result = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }

    let result = match cli.command {
        Commands::Synth(args) => commands::synth::execute(args).await,
        Commands::Validate(args) => commands::validate::execute(args).await,
        Commands::Plan(args) => commands::plan::execute(args).await,
        Commands::Apply(args) => commands::apply::execute(args).await,
        Commands::Destroy(args) => commands::destroy::execute(args).await,
        Commands::State(args) => commands::state::execute(args).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(categorize_error(&e))
        }
    }
}

/// Map an error to its exit code by the first typed cause in the chain.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(error) = cause.downcast_ref::<EngineError>() {
            return match error {
                EngineError::Declaration(_) => ExitCodes::DECLARATION_FAILURE,
                EngineError::Apply(_) => ExitCodes::APPLY_ERROR,
                _ => ExitCodes::GENERAL_ERROR,
            };
        }
        if cause.is::<DeclarationError>() || cause.is::<ValidationFailed>() {
            return ExitCodes::DECLARATION_FAILURE;
        }
        if let Some(error) = cause.downcast_ref::<ConfigError>() {
            return match error {
                ConfigError::Declaration(_) => ExitCodes::DECLARATION_FAILURE,
                ConfigError::Io(_) => ExitCodes::GENERAL_ERROR,
                _ => ExitCodes::INVALID_ARGS,
            };
        }
    }
    ExitCodes::GENERAL_ERROR
}
