//! `burrow run`: create or reuse the container for a source directory.

use std::path::PathBuf;

use clap::Args;

use burrow_common::config::BurrowConfig;
use burrow_image::remote::RegistryTransport;
use burrow_runtime::engine::RunOptions;

use crate::commands::{CacheUse, default_registry, exit_with, launcher, open_engine};
use crate::output;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Source directory holding `setting.yml` (and a rootfs when no image
    /// is named).
    #[arg(long, default_value = ".")]
    pub source: PathBuf,

    /// Settings file to use instead of `<source>/setting.yml`.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Register the container without launching its command.
    #[arg(long)]
    pub passive: bool,
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error if the settings are invalid, the image cannot be
/// resolved, or the launch fails.
pub fn execute(args: RunArgs, config: &BurrowConfig) -> anyhow::Result<()> {
    let launcher = launcher(config)?;
    let engine = open_engine(config, CacheUse::Optional)?;
    let client = default_registry(config)?;
    let transport: &dyn RegistryTransport = &client;

    let outcome = engine.run(
        &RunOptions {
            source_dir: args.source,
            config_path: args.config,
            passive: args.passive,
        },
        &launcher,
        Some(transport),
    )?;

    let verb = if outcome.created { "created" } else { "reusing" };
    output::done(&format!(
        "{verb} container {} ({})",
        outcome.record.id,
        outcome.record.base.describe()
    ));
    if let Some(code) = outcome.exit_code {
        exit_with(code);
    }
    Ok(())
}
