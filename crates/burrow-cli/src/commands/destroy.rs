//! `burrow destroy`: remove a container.

use clap::Args;

use burrow_common::config::BurrowConfig;
use burrow_common::types::ContainerId;

use crate::commands::{CacheUse, open_engine};
use crate::output;

/// Arguments for the `destroy` command.
#[derive(Args, Debug)]
pub struct DestroyArgs {
    /// Container ID.
    pub id: String,
}

/// Executes the `destroy` command.
///
/// # Errors
///
/// Returns an error if the container is unknown or busy.
pub fn execute(args: DestroyArgs, config: &BurrowConfig) -> anyhow::Result<()> {
    let engine = open_engine(config, CacheUse::Optional)?;
    let id = ContainerId::new(args.id);
    engine.destroy(&id)?;
    output::done(&format!("destroyed {id}"));
    Ok(())
}
