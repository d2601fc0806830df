//! `burrow set`: change a container's path remapping.

use clap::Args;

use burrow_common::config::BurrowConfig;
use burrow_common::types::ContainerId;
use burrow_core::remap::RemapKind;

use crate::commands::{CacheUse, open_engine};
use crate::output;

/// Arguments for the `set` command.
#[derive(Args, Debug)]
pub struct SetArgs {
    /// Container ID.
    #[arg(long)]
    pub id: String,

    /// `add_map` or `remove_map`.
    #[arg(long = "type")]
    pub kind: RemapKind,

    /// Program the mapping applies to.
    #[arg(long)]
    pub name: String,

    /// Mapping as `orig:subst;orig2:subst2`.
    #[arg(long)]
    pub value: String,
}

/// Executes the `set` command.
///
/// # Errors
///
/// Returns an error for a malformed mapping, an unknown container, or an
/// unavailable cache.
pub fn execute(args: SetArgs, config: &BurrowConfig) -> anyhow::Result<()> {
    let engine = open_engine(config, CacheUse::Required)?;
    let table = engine.set_remap(&ContainerId::new(args.id), args.kind, &args.name, &args.value)?;
    match table.encode_program(&args.name) {
        Some(encoded) => output::done(&format!("{}: {encoded}", args.name)),
        None => output::done(&format!("{}: no remapping", args.name)),
    }
    Ok(())
}
