//! Plan command - Show the change set against stored state.

use anyhow::Result;
use clap::Args;

use stratus_engine::Deployer;

use super::StackArgs;

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    stack: StackArgs,

    /// Print the change set as JSON
    #[arg(long)]
    json: bool,
}

pub async fn execute(args: PlanArgs) -> Result<()> {
    let topology = args.stack.declare()?;
    let deployer = Deployer::new(args.stack.engine());
    let changes = deployer.plan(&topology.graph).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&changes)?);
        return Ok(());
    }

    if changes.is_empty() {
        println!("No changes. {} is up to date.", topology.graph.name());
        return Ok(());
    }
    for change in changes.iter() {
        println!("{}", change);
    }
    println!();
    println!("Plan: {}", changes.summary());
    Ok(())
}
