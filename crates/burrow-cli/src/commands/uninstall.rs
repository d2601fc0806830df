//! `burrow uninstall`: remove the data directory.

use clap::Args;

use burrow_common::config::BurrowConfig;
use burrow_common::types::ContainerStatus;
use burrow_core::filesystem::remove_tree;

use crate::commands::{CacheUse, open_engine};
use crate::output;

/// Arguments for the `uninstall` command.
#[derive(Args, Debug)]
pub struct UninstallArgs {
    /// Remove even when containers are still registered.
    #[arg(long)]
    pub force: bool,
}

/// Executes the `uninstall` command.
///
/// Removes the support bundle, images, layers, and every container.
///
/// # Errors
///
/// Returns an error if a container is running, containers remain and
/// `--force` is not given, or the directory cannot be removed.
pub fn execute(args: UninstallArgs, config: &BurrowConfig) -> anyhow::Result<()> {
    if !config.data_dir.exists() {
        output::note(&format!("nothing installed at {}", config.data_dir.display()));
        return Ok(());
    }
    let containers = open_engine(config, CacheUse::Unused)?.list()?;
    if let Some(running) = containers
        .iter()
        .find(|c| c.status == ContainerStatus::Running)
    {
        anyhow::bail!("container {} is running", running.id);
    }
    if !containers.is_empty() && !args.force {
        anyhow::bail!(
            "{} containers are registered; destroy them or pass --force",
            containers.len()
        );
    }

    remove_tree(&config.data_dir)?;
    tracing::info!(dir = %config.data_dir.display(), "data directory removed");
    output::done(&format!("removed {}", config.data_dir.display()));
    Ok(())
}
