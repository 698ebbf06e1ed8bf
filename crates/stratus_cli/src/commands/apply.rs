//! Apply command - Realize the stack through the local engine.

use anyhow::Result;
use clap::Args;
use tracing::info;

use stratus_engine::{DeployOutcome, Deployer};
use stratus_iac::TopologyValidator;

use super::{StackArgs, ValidationFailed};

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    stack: StackArgs,

    /// Only show what would change
    #[arg(long)]
    dry_run: bool,

    /// Apply even if topology checks fail
    #[arg(long)]
    skip_validation: bool,
}

pub async fn execute(args: ApplyArgs) -> Result<()> {
    let topology = args.stack.declare()?;

    if !args.skip_validation {
        let report = TopologyValidator::validate(&topology.graph);
        if !report.passed {
            for check in report.failures() {
                eprintln!("{}: {}", check.name, check.message);
            }
            return Err(ValidationFailed {
                failed: report.failures().count(),
                total: report.checks.len(),
            }
            .into());
        }
    }

    let deployer = Deployer::new(args.stack.engine()).dry_run(args.dry_run);
    match deployer.deploy(&topology.graph).await? {
        DeployOutcome::Planned(changes) => {
            for change in changes.iter() {
                println!("{}", change);
            }
            println!();
            println!("Dry run: {}", changes.summary());
        }
        DeployOutcome::Applied(report) if report.is_noop() => {
            println!("No changes. {} is up to date.", report.stack);
        }
        DeployOutcome::Applied(report) => {
            for change in report.changes.iter() {
                println!("{}", change);
            }
            println!();
            println!(
                "Applied {} ({}) in {}ms: {}",
                report.stack,
                report.deployment_id,
                report.duration_ms,
                report.changes.summary()
            );
            info!("State written to {}", args.stack.state_dir.display());
        }
    }
    Ok(())
}
