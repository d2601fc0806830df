//! `burrow resume`: run a command in an existing container.

use clap::Args;

use burrow_common::config::BurrowConfig;
use burrow_common::types::ContainerId;

use crate::commands::{CacheUse, exit_with, launcher, open_engine};

/// Arguments for the `resume` command.
#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Container ID.
    pub id: String,

    /// Program and arguments; the container's default command when empty.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Executes the `resume` command and exits with the program's code.
///
/// # Errors
///
/// Returns an error if the container is unknown or busy, or the launch
/// fails.
pub fn execute(args: ResumeArgs, config: &BurrowConfig) -> anyhow::Result<()> {
    let launcher = launcher(config)?;
    let engine = open_engine(config, CacheUse::Optional)?;
    let code = engine.resume(&ContainerId::new(args.id), &args.args, &launcher)?;
    exit_with(code);
    Ok(())
}
