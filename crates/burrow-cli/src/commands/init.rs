//! `burrow init`: prepare the data directory and support bundle.

use std::path::PathBuf;

use clap::Args;

use burrow_common::config::BurrowConfig;
use burrow_core::syscheck::ComponentState;

use crate::commands::{CacheUse, open_engine};
use crate::output;

/// Arguments for the `init` command.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Remove the installed support bundle before installing.
    #[arg(long)]
    pub reset: bool,

    /// Support bundle tarball (`.tar.gz`) to install.
    #[arg(long)]
    pub dependency: Option<PathBuf>,
}

/// Executes the `init` command.
///
/// # Errors
///
/// Returns an error if the directories cannot be created or the bundle
/// cannot be unpacked.
pub fn execute(args: InitArgs, config: &BurrowConfig) -> anyhow::Result<()> {
    let engine = open_engine(config, CacheUse::Unused)?;
    let bundle = engine.init(args.reset, args.dependency.as_deref())?;

    for (component, state) in bundle.states() {
        match state {
            ComponentState::Ready => output::done(component),
            other => output::note(&format!("{component}: {other:?}")),
        }
    }
    if bundle.require_execution().is_err() {
        output::note("execution components incomplete; run init with --dependency <bundle.tar.gz>");
    }
    output::done(&format!("data directory ready at {}", config.data_dir.display()));
    Ok(())
}
