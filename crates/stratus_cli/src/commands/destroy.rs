//! Destroy command - Tear the stack down.

use anyhow::Result;
use clap::Args;

use stratus_engine::Deployer;

use super::StackArgs;

#[derive(Args)]
pub struct DestroyArgs {
    #[command(flatten)]
    stack: StackArgs,

    /// Only list what would be removed
    #[arg(long)]
    dry_run: bool,
}

pub async fn execute(args: DestroyArgs) -> Result<()> {
    let stack = args.stack.stack_name()?;
    let deployer = Deployer::new(args.stack.engine()).dry_run(args.dry_run);
    let report = deployer.destroy(&stack).await?;

    if report.deleted.is_empty() {
        println!("Nothing to destroy for {}", stack);
        return Ok(());
    }
    for id in &report.deleted {
        println!("  - {}", id);
    }
    println!();
    if args.dry_run {
        println!("Dry run: {} resources would be removed", report.deleted.len());
    } else {
        println!("Destroyed {} ({} resources)", stack, report.deleted.len());
    }
    Ok(())
}
