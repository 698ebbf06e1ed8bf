//! State command - Show the stored state snapshot.

use anyhow::Result;
use clap::Args;

use stratus_engine::Deployer;

use super::StackArgs;

#[derive(Args)]
pub struct StateArgs {
    #[command(flatten)]
    stack: StackArgs,

    /// Print the full snapshot as JSON
    #[arg(long)]
    json: bool,
}

pub async fn execute(args: StateArgs) -> Result<()> {
    let stack = args.stack.stack_name()?;
    let deployer = Deployer::new(args.stack.engine());

    let Some(snapshot) = deployer.state(&stack).await? else {
        println!("No state for {}", stack);
        return Ok(());
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!(
        "{} (serial {}, updated {})",
        snapshot.stack,
        snapshot.serial,
        snapshot.updated_at.to_rfc3339()
    );
    for (id, resource) in &snapshot.resources {
        println!("  {:<48} {:<36} {}", id.as_str(), resource.kind.type_name(), resource.physical_id);
    }
    Ok(())
}
