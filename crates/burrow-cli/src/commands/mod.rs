//! CLI command definitions and dispatch.

pub mod destroy;
pub mod docker;
pub mod expose;
pub mod get;
pub mod init;
pub mod list;
pub mod resume;
pub mod rpc;
pub mod run;
pub mod set;
pub mod uninstall;
pub mod version;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use burrow_common::config::BurrowConfig;
use burrow_common::constants::HOME_ENV;
use burrow_core::syscheck::SupportBundle;
use burrow_image::reference::ImageRef;
use burrow_image::remote::{Credentials, RegistryClient};
use burrow_runtime::engine::Engine;
use burrow_runtime::launcher::Launcher;

/// burrow: rootless container engine.
#[derive(Parser, Debug)]
#[command(name = "burrow", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Data directory (defaults to `$BURROW_HOME`, then `~/.burrow`).
    #[arg(long, global = true, env = HOME_ENV)]
    pub data_dir: Option<PathBuf>,

    /// Settings cache address.
    #[arg(long, global = true)]
    pub cache_addr: Option<String>,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Prepare the data directory and install the support bundle.
    Init(init::InitArgs),
    /// List containers.
    List(list::ListArgs),
    /// Create (or reuse) the container for a source directory and run it.
    Run(run::RunArgs),
    /// Read a container setting from the settings cache.
    Get(get::GetArgs),
    /// Change a container's path remapping.
    Set(set::SetArgs),
    /// Run a command in an existing container.
    Resume(resume::ResumeArgs),
    /// Remove a container and its writable layer.
    Destroy(destroy::DestroyArgs),
    /// Expose a container binary as a host wrapper script.
    Expose(expose::ExposeArgs),
    /// Remote execution service and client.
    Rpc(rpc::RpcArgs),
    /// Image operations.
    Docker(docker::DockerArgs),
    /// Remove the data directory and everything in it.
    Uninstall(uninstall::UninstallArgs),
    /// Print version information.
    Version,
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = BurrowConfig::resolve(cli.data_dir, cli.cache_addr.as_deref())?;
    tracing::debug!(data_dir = %config.data_dir.display(), "configuration resolved");
    match cli.command {
        Command::Init(args) => init::execute(args, &config),
        Command::List(args) => list::execute(args, &config),
        Command::Run(args) => run::execute(args, &config),
        Command::Get(args) => get::execute(args, &config),
        Command::Set(args) => set::execute(args, &config),
        Command::Resume(args) => resume::execute(args, &config),
        Command::Destroy(args) => destroy::execute(args, &config),
        Command::Expose(args) => expose::execute(args, &config),
        Command::Rpc(args) => rpc::execute(args, &config),
        Command::Docker(args) => docker::execute(args, &config),
        Command::Uninstall(args) => uninstall::execute(args, &config),
        Command::Version => version::execute(&config),
    }
}

/// Whether a command can run without the settings cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheUse {
    /// The command fails without it.
    Required,
    /// The command runs degraded without it.
    Optional,
    /// The command never touches it.
    Unused,
}

/// Opens the engine and connects the settings cache as `cache` asks.
///
/// # Errors
///
/// Returns an error if the data directory cannot be opened or a required
/// cache is unavailable.
pub fn open_engine(config: &BurrowConfig, cache: CacheUse) -> anyhow::Result<Engine> {
    let mut engine = Engine::open(config.clone())?;
    match cache {
        CacheUse::Required => engine.connect_cache(true)?,
        CacheUse::Optional => engine.connect_cache(false)?,
        CacheUse::Unused => {}
    }
    Ok(engine)
}

/// Builds the launcher after checking the execution components once.
///
/// # Errors
///
/// Returns `MissingDependency` naming the first absent component.
pub fn launcher(config: &BurrowConfig) -> anyhow::Result<Launcher> {
    let components = SupportBundle::inspect(&config.sys_dir()).require_execution()?;
    Ok(Launcher::new(components)?)
}

/// Registry client for `image`'s registry.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn registry(
    image: &ImageRef,
    user: Option<String>,
    pass: Option<String>,
) -> anyhow::Result<RegistryClient> {
    Ok(RegistryClient::new(&image.registry)?.with_credentials(Credentials::from_options(user, pass)))
}

/// Anonymous client for the configured default registry, used when an
/// image named in run settings must be downloaded.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn default_registry(config: &BurrowConfig) -> anyhow::Result<RegistryClient> {
    Ok(RegistryClient::new(&config.registry)?)
}

/// Parses an image reference against the configured default registry.
///
/// # Errors
///
/// Returns `MalformedInput` for an invalid reference.
pub fn image_ref(config: &BurrowConfig, reference: &str) -> anyhow::Result<ImageRef> {
    Ok(ImageRef::parse_with_registry(reference, &config.registry)?)
}

/// Exits with a launched process's code; returns normally for zero.
pub fn exit_with(code: i32) {
    if code != 0 {
        std::process::exit(code);
    }
}
