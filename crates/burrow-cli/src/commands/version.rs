//! `burrow version`: print version and install state.

use burrow_common::config::BurrowConfig;
use burrow_common::constants::{APP_NAME, VERSION};
use burrow_core::syscheck::SupportBundle;

use crate::output::{BOLD, DIM, RESET};

/// Executes the `version` command.
///
/// # Errors
///
/// Never fails; the signature matches the other commands.
#[allow(clippy::unnecessary_wraps)]
pub fn execute(config: &BurrowConfig) -> anyhow::Result<()> {
    println!("{APP_NAME} {VERSION}");
    let bundle = SupportBundle::inspect(&config.sys_dir());
    let state = if bundle.require_execution().is_ok() {
        "ready"
    } else {
        "not installed"
    };
    eprintln!(
        "  {BOLD}data{RESET} {} {DIM}(support bundle {state}){RESET}",
        config.data_dir.display()
    );
    Ok(())
}
