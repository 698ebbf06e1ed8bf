//! Validate command - Run declaration and topology checks.

use anyhow::Result;
use clap::Args;
use tracing::info;

use stratus_iac::TopologyValidator;

use super::{StackArgs, ValidationFailed};

#[derive(Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    stack: StackArgs,
}

pub async fn execute(args: ValidateArgs) -> Result<()> {
    let topology = args.stack.declare()?;
    info!("Validating stack: {}", topology.graph.name());

    let report = TopologyValidator::validate(&topology.graph);
    for check in &report.checks {
        let mark = if check.passed { "ok" } else { "FAILED" };
        println!("{:<22} {:<6} {}", check.name, mark, check.message);
    }

    if !report.passed {
        return Err(ValidationFailed {
            failed: report.failures().count(),
            total: report.checks.len(),
        }
        .into());
    }

    println!();
    println!("All {} checks passed for {}", report.checks.len(), topology.graph.name());
    Ok(())
}
