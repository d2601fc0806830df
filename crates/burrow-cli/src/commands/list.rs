//! `burrow list`: list containers.

use clap::Args;

use burrow_common::config::BurrowConfig;

use crate::commands::{CacheUse, open_engine};
use crate::output::format_age;

/// Arguments for the `list` command.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Print the registry as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `list` command.
///
/// # Errors
///
/// Returns an error if the container registry cannot be read.
pub fn execute(args: ListArgs, config: &BurrowConfig) -> anyhow::Result<()> {
    let engine = open_engine(config, CacheUse::Unused)?;
    let containers = engine.list()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&containers)?);
        return Ok(());
    }
    if containers.is_empty() {
        println!("No containers found.");
        return Ok(());
    }

    let now = chrono::Utc::now();
    println!(
        "{:<14} {:<16} {:<10} {:<6} {:<30}",
        "CONTAINER ID", "NAME", "STATUS", "AGE", "BASE"
    );
    for c in &containers {
        println!(
            "{:<14} {:<16} {:<10} {:<6} {:<30}",
            c.id,
            c.name.as_deref().unwrap_or("-"),
            c.status,
            format_age(c.created_at, now),
            c.base.describe()
        );
    }
    Ok(())
}
