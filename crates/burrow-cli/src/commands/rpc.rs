//! `burrow rpc`: remote execution server and client.

use std::sync::Arc;

use clap::{Args, Subcommand};

use burrow_common::config::BurrowConfig;
use burrow_rpc::client::RpcClient;
use burrow_rpc::protocol::ExecParams;
use burrow_rpc::server::{self, RpcServer};

use crate::commands::{CacheUse, launcher, open_engine};
use crate::output;

/// Arguments for the `rpc` command.
#[derive(Args, Debug)]
pub struct RpcArgs {
    /// Operation.
    #[command(subcommand)]
    pub command: RpcCommand,
}

/// Server address shared by every operation.
#[derive(Args, Debug, Clone)]
pub struct Endpoint {
    /// Server IP address.
    #[arg(long, default_value = "127.0.0.1")]
    pub ip: String,

    /// Server port.
    #[arg(long)]
    pub port: u16,
}

/// `rpc` operations.
#[derive(Subcommand, Debug)]
pub enum RpcCommand {
    /// Start a command on the server and print its pid.
    Exec {
        /// Server address.
        #[command(flatten)]
        endpoint: Endpoint,
        /// Seconds after which the command is killed.
        #[arg(long)]
        timeout: Option<u64>,
        /// Container to run in; the host when absent.
        #[arg(long)]
        id: Option<String>,
        /// Program to run.
        cmd: String,
        /// Program arguments.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// List the server's tasks.
    Query {
        /// Server address.
        #[command(flatten)]
        endpoint: Endpoint,
    },
    /// Terminate a task.
    Kill {
        /// Server address.
        #[command(flatten)]
        endpoint: Endpoint,
        /// Task pid.
        #[arg(long)]
        pid: i32,
    },
    /// Show a task's status and captured output.
    Status {
        /// Server address.
        #[command(flatten)]
        endpoint: Endpoint,
        /// Task pid.
        #[arg(long)]
        pid: i32,
    },
    /// Run the server in the foreground.
    Serve {
        /// Listen address.
        #[command(flatten)]
        endpoint: Endpoint,
    },
}

/// Executes the `rpc` command.
///
/// # Errors
///
/// Returns an error if the server is unreachable or rejects the request.
pub fn execute(args: RpcArgs, config: &BurrowConfig) -> anyhow::Result<()> {
    match args.command {
        RpcCommand::Exec {
            endpoint,
            timeout,
            id,
            cmd,
            args,
        } => {
            let pid = client(&endpoint).exec(&ExecParams {
                cmd,
                args,
                timeout,
                container: id,
            })?;
            println!("{pid}");
        }
        RpcCommand::Query { endpoint } => {
            let tasks = client(&endpoint).query()?;
            if tasks.is_empty() {
                println!("No tasks.");
            }
            for (pid, cmd) in tasks {
                println!("{pid:<8} {cmd}");
            }
        }
        RpcCommand::Kill { endpoint, pid } => {
            let snapshot = client(&endpoint).kill(pid)?;
            output::done(&format!("task {} {}", snapshot.pid, snapshot.status));
        }
        RpcCommand::Status { endpoint, pid } => {
            let snapshot = client(&endpoint).status(pid)?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        RpcCommand::Serve { endpoint } => serve(&endpoint, config)?,
    }
    Ok(())
}

fn client(endpoint: &Endpoint) -> RpcClient {
    RpcClient::new(endpoint.ip.clone(), endpoint.port)
}

fn serve(endpoint: &Endpoint, config: &BurrowConfig) -> anyhow::Result<()> {
    let mut server = RpcServer::new();
    match launcher(config) {
        Ok(launcher) => {
            let engine = open_engine(config, CacheUse::Optional)?;
            server = server.with_containers(engine, launcher);
        }
        Err(e) => {
            output::note(&format!("container exec disabled: {e}"));
        }
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let listener = server::bind(&endpoint.ip, endpoint.port).await?;
        output::done(&format!("serving on {}:{}", endpoint.ip, endpoint.port));
        Arc::new(server).serve(listener).await?;
        Ok::<(), anyhow::Error>(())
    })
}
