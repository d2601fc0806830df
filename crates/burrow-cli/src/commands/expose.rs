//! `burrow expose`: expose a container binary on the host.

use clap::Args;

use burrow_common::config::BurrowConfig;
use burrow_common::types::ContainerId;

use crate::commands::{CacheUse, open_engine};
use crate::output;

/// Arguments for the `expose` command.
#[derive(Args, Debug)]
pub struct ExposeArgs {
    /// Container ID.
    #[arg(long)]
    pub id: String,

    /// Binary name, looked up in the container's bin directories.
    #[arg(long)]
    pub name: String,
}

/// Executes the `expose` command.
///
/// # Errors
///
/// Returns an error if the container or binary is unknown.
pub fn execute(args: ExposeArgs, config: &BurrowConfig) -> anyhow::Result<()> {
    let engine = open_engine(config, CacheUse::Unused)?;
    let wrapper = engine.expose(&ContainerId::new(args.id), &args.name)?;
    output::done(&format!("exposed {} as {}", args.name, wrapper.display()));
    output::note(&format!(
        "add {} to PATH to call it directly",
        config.expose_dir().display()
    ));
    Ok(())
}
