//! `burrow get`: read a container setting from the settings cache.

use clap::Args;

use burrow_common::config::BurrowConfig;
use burrow_common::types::ContainerId;

use crate::commands::{CacheUse, open_engine};

/// Arguments for the `get` command.
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Container ID.
    #[arg(long)]
    pub id: String,

    /// Setting name (a program name for its remap entries).
    #[arg(long)]
    pub name: String,
}

/// Executes the `get` command.
///
/// # Errors
///
/// Returns an error if the cache is unavailable or the key is unset.
pub fn execute(args: GetArgs, config: &BurrowConfig) -> anyhow::Result<()> {
    let engine = open_engine(config, CacheUse::Required)?;
    let value = engine.get(&ContainerId::new(args.id), &args.name)?;
    println!("{value}");
    Ok(())
}
