//! Remote execution server.
//!
//! Accepts connections on a TCP listener and answers one response line per
//! request line. Each spawned command gets a watcher task that enforces its
//! timeout, streams its output into the task entry, and records its exit.

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::Child;

use burrow_common::error::{BurrowError, Result};
use burrow_common::types::{ContainerId, TaskStatus};
use burrow_core::shim::ShimSession;
use burrow_runtime::engine::Engine;
use burrow_runtime::launcher::{self, Launcher, PreparedCommand};

use crate::protocol::{
    ExecParams, ExecResult, Method, PidParams, Request, Response, encode_line,
};
use crate::task::{OutputStream, RpcTask, TaskEntry, TaskTable, signal_group};

/// How long finished tasks stay queryable.
pub const TASK_RETENTION: Duration = Duration::from_secs(3600);

/// Interval between garbage-collection sweeps.
pub const GC_INTERVAL: Duration = Duration::from_secs(60);

/// How long a watcher keeps reading output after the process exits.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

const READ_CHUNK: usize = 8192;

#[derive(Debug)]
struct ContainerExec {
    engine: Engine,
    launcher: Launcher,
}

/// The per-host execution service.
#[derive(Debug)]
pub struct RpcServer {
    tasks: TaskTable,
    containers: Option<Arc<ContainerExec>>,
    retention: Duration,
    gc_interval: Duration,
}

impl Default for RpcServer {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcServer {
    /// A server that runs host commands only.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: TaskTable::new(),
            containers: None,
            retention: TASK_RETENTION,
            gc_interval: GC_INTERVAL,
        }
    }

    /// Enables `exec` inside containers managed by `engine`.
    #[must_use]
    pub fn with_containers(mut self, engine: Engine, launcher: Launcher) -> Self {
        self.containers = Some(Arc::new(ContainerExec { engine, launcher }));
        self
    }

    /// Overrides task retention and the sweep interval.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration, gc_interval: Duration) -> Self {
        self.retention = retention;
        self.gc_interval = gc_interval;
        self
    }

    /// The task table.
    #[must_use]
    pub const fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    /// Serves connections from `listener` until the process ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener address cannot be read.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let addr = listener
            .local_addr()
            .map_err(|e| BurrowError::io("rpc listener", e))?;
        tracing::info!(addr = %addr, "rpc server listening");

        let sweeper = Arc::clone(&self);
        let _ = tokio::spawn(async move { sweeper.collect_garbage_periodically().await });

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };
            tracing::debug!(peer = %peer, "rpc connection accepted");
            let server = Arc::clone(&self);
            let _ = tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream).await {
                    tracing::warn!(peer = %peer, error = %e, "rpc connection failed");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await.map_err(connection_error)? {
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<Request>(&line) {
                Ok(request) => self.handle(&request).await,
                Err(e) => Response::from_result(Err(BurrowError::MalformedInput {
                    input: line.clone(),
                    message: e.to_string(),
                })),
            };
            writer
                .write_all(encode_line(&response)?.as_bytes())
                .await
                .map_err(connection_error)?;
        }
        Ok(())
    }

    /// Answers one request.
    pub async fn handle(&self, request: &Request) -> Response {
        let result = self.dispatch(request).await;
        if let Err(e) = &result {
            tracing::debug!(method = %request.method, error = %e, "rpc request failed");
        }
        Response::from_result(result)
    }

    async fn dispatch(&self, request: &Request) -> Result<serde_json::Value> {
        match Method::parse(&request.method)? {
            Method::Exec => {
                let pid = self.exec(request.params()?).await?;
                Ok(serde_json::to_value(ExecResult { pid })?)
            }
            Method::Query => Ok(serde_json::to_value(self.tasks.query().await)?),
            Method::Kill => {
                let PidParams { pid } = request.params()?;
                Ok(serde_json::to_value(self.tasks.kill(pid).await?)?)
            }
            Method::Status => {
                let PidParams { pid } = request.params()?;
                Ok(serde_json::to_value(self.tasks.status(pid).await?)?)
            }
        }
    }

    /// Spawns a command detached, registers it, and starts its watcher.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::MalformedInput` for an empty command,
    /// `BurrowError::NotFound` for an unknown container, or an I/O error
    /// if the process cannot be spawned.
    pub async fn exec(&self, params: ExecParams) -> Result<i32> {
        if params.cmd.trim().is_empty() {
            return Err(BurrowError::MalformedInput {
                input: params.cmd,
                message: "no command to run".into(),
            });
        }
        let PreparedCommand { command, session } = match &params.container {
            Some(id) => self.container_command(ContainerId::new(id.as_str()), &params).await?,
            None => host_command(&params),
        };

        let mut child = tokio::process::Command::from(command)
            .spawn()
            .map_err(|e| BurrowError::io(&params.cmd, e))?;
        let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
            let _ = child.wait().await;
            return Err(BurrowError::Config {
                message: format!("{} exited before it could be tracked", params.cmd),
            });
        };

        let timeout = params.timeout.map(Duration::from_secs);
        let entry = self
            .tasks
            .insert(RpcTask::new(pid, params.command_line(), timeout))
            .await;
        tracing::info!(
            pid,
            cmd = %params.command_line(),
            timeout = ?params.timeout,
            container = ?params.container,
            "task started"
        );
        let _ = tokio::spawn(watch(entry, child, timeout, session));
        Ok(pid)
    }

    async fn container_command(
        &self,
        id: ContainerId,
        params: &ExecParams,
    ) -> Result<PreparedCommand> {
        let containers =
            self.containers
                .clone()
                .ok_or_else(|| BurrowError::MissingDependency {
                    component: "container launcher".into(),
                    reason: "server was started without container support".into(),
                })?;
        let program = params.cmd.clone();
        let args = params.args.clone();
        tokio::task::spawn_blocking(move || {
            containers
                .engine
                .prepare_exec(&id, &program, &args, &containers.launcher)
        })
        .await
        .map_err(|e| BurrowError::Config {
            message: format!("preparing container command failed: {e}"),
        })?
    }

    async fn collect_garbage_periodically(&self) {
        let mut ticker = tokio::time::interval(self.gc_interval);
        loop {
            let _ = ticker.tick().await;
            let _ = self.tasks.collect_garbage(self.retention).await;
        }
    }
}

/// Binds the listener for [`RpcServer::serve`].
///
/// # Errors
///
/// Returns an I/O error if the address cannot be bound.
pub async fn bind(ip: &str, port: u16) -> Result<TcpListener> {
    TcpListener::bind((ip, port))
        .await
        .map_err(|e| BurrowError::io(PathBuf::from(format!("{ip}:{port}")), e))
}

fn host_command(params: &ExecParams) -> PreparedCommand {
    let mut command = Command::new(&params.cmd);
    let _ = command.args(&params.args);
    let mut prepared = PreparedCommand {
        command,
        session: ShimSession::default(),
    };
    prepared.detach();
    prepared
}

/// Waits for one task's process, enforcing its timeout.
async fn watch(entry: TaskEntry, mut child: Child, timeout: Option<Duration>, session: ShimSession) {
    let pid = entry.lock().await.pid;
    let readers: Vec<_> = [
        child
            .stdout
            .take()
            .map(|out| tokio::spawn(drain(out, Arc::clone(&entry), OutputStream::Stdout))),
        child
            .stderr
            .take()
            .map(|err| tokio::spawn(drain(err, Arc::clone(&entry), OutputStream::Stderr))),
    ]
    .into_iter()
    .flatten()
    .collect();

    let waited = match timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
        None => Some(child.wait().await),
    };
    let status = match waited {
        Some(status) => status,
        None => {
            signal_group(pid, Signal::SIGKILL);
            let mut task = entry.lock().await;
            if task.status == TaskStatus::Running {
                task.mark(TaskStatus::TimedOut);
                tracing::warn!(pid, cmd = %task.cmd, "task timed out, process group killed");
            }
            drop(task);
            child.wait().await
        }
    };
    let code = match status {
        Ok(status) => launcher::exit_code(status),
        Err(e) => {
            tracing::warn!(pid, error = %e, "waiting for task failed");
            -1
        }
    };

    for mut reader in readers {
        if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
            reader.abort();
        }
    }

    let mut task = entry.lock().await;
    task.finish(code);
    tracing::info!(pid, code, status = %task.status, "task finished");
    drop(task);
    drop(session);
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R, entry: TaskEntry, stream: OutputStream) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => entry.lock().await.capture(stream, &buf[..n]),
            Err(e) => {
                tracing::debug!(error = %e, ?stream, "output stream closed");
                break;
            }
        }
    }
}

fn connection_error(e: std::io::Error) -> BurrowError {
    BurrowError::io("rpc connection", e)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec_params(cmd: &str, args: &[&str], timeout: Option<u64>) -> ExecParams {
        ExecParams {
            cmd: cmd.into(),
            args: args.iter().map(ToString::to_string).collect(),
            timeout,
            container: None,
        }
    }

    async fn wait_for_exit(server: &RpcServer, pid: i32) -> crate::protocol::TaskSnapshot {
        for _ in 0..200 {
            let snap = server.tasks().status(pid).await.unwrap();
            if snap.exit_code.is_some() {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        server.tasks().status(pid).await.unwrap()
    }

    #[tokio::test]
    async fn completed_task_keeps_exit_code_and_output() {
        let server = RpcServer::new();
        let pid = server
            .exec(exec_params("/bin/sh", &["-c", "echo out; echo err >&2; exit 4"], None))
            .await
            .unwrap();
        let snap = wait_for_exit(&server, pid).await;
        assert_eq!(snap.status, TaskStatus::Completed);
        assert_eq!(snap.exit_code, Some(4));
        assert_eq!(snap.stdout, "out\n");
        assert_eq!(snap.stderr, "err\n");
        assert!(snap.finished_at.is_some());
    }

    #[tokio::test]
    async fn timeout_kills_the_process_group() {
        let server = RpcServer::new();
        let pid = server
            .exec(exec_params("sleep", &["30"], Some(1)))
            .await
            .unwrap();
        let snap = wait_for_exit(&server, pid).await;
        assert_eq!(snap.status, TaskStatus::TimedOut);
        assert_eq!(snap.exit_code, Some(128 + 9));
        assert!(
            nix::sys::signal::killpg(nix::unistd::Pid::from_raw(pid), None).is_err(),
            "process group should be gone"
        );
    }

    #[tokio::test]
    async fn kill_marks_task_killed() {
        let server = RpcServer::new();
        let pid = server
            .exec(exec_params("sleep", &["30"], None))
            .await
            .unwrap();
        let snap = server.tasks().kill(pid).await.unwrap();
        assert_eq!(snap.status, TaskStatus::Killed);
        let done = wait_for_exit(&server, pid).await;
        assert_eq!(done.status, TaskStatus::Killed);
        assert_eq!(done.exit_code, Some(128 + 15));
        assert_eq!(server.tasks().kill(pid).await.unwrap_err().kind(), "config");
    }

    #[tokio::test]
    async fn unknown_method_and_missing_container_support_are_errors() {
        let server = RpcServer::new();
        let response = server
            .handle(&Request {
                method: "reboot".into(),
                params: serde_json::Value::Null,
            })
            .await;
        assert!(matches!(response, Response::Error(ref e) if e.kind == "malformed_input"));

        let mut params = exec_params("/bin/true", &[], None);
        params.container = Some("abc".into());
        let err = server.exec(params).await.unwrap_err();
        assert_eq!(err.kind(), "missing_dependency");
        assert!(server.tasks().is_empty().await);
    }
}
