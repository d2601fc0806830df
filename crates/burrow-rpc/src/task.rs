//! Remote task table.
//!
//! The table lock is held only to insert, look up, enumerate, or remove
//! entries; status changes lock the single entry. Watchers never touch the
//! table lock while waiting on their process.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::sync::Mutex;

use burrow_common::constants::MAX_CAPTURED_OUTPUT;
use burrow_common::error::{BurrowError, Result};
use burrow_common::types::TaskStatus;

use crate::protocol::TaskSnapshot;

/// Which output pipe a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// One spawned process and what is known about it.
#[derive(Debug, Clone)]
pub struct RpcTask {
    /// Process id, also the process group id.
    pub pid: i32,
    /// Command line.
    pub cmd: String,
    /// Spawn time.
    pub started_at: DateTime<Utc>,
    /// Kill deadline relative to `started_at`.
    pub timeout: Option<Duration>,
    /// Current status.
    pub status: TaskStatus,
    /// Exit code once reaped.
    pub exit_code: Option<i32>,
    /// Captured standard output, capped.
    pub stdout: Vec<u8>,
    /// Captured standard error, capped.
    pub stderr: Vec<u8>,
    /// Time the task reached its final state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl RpcTask {
    /// A freshly spawned, running task.
    #[must_use]
    pub fn new(pid: i32, cmd: String, timeout: Option<Duration>) -> Self {
        Self {
            pid,
            cmd,
            started_at: Utc::now(),
            timeout,
            status: TaskStatus::Running,
            exit_code: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            finished_at: None,
        }
    }

    /// Moves a running task to a terminal status. Already-terminal tasks
    /// keep their status.
    pub fn mark(&mut self, status: TaskStatus) {
        if self.status == TaskStatus::Running {
            self.status = status;
            self.finished_at = Some(Utc::now());
        }
    }

    /// Records the reaped process. A task still marked running becomes
    /// completed.
    pub fn finish(&mut self, exit_code: i32) {
        self.mark(TaskStatus::Completed);
        self.exit_code = Some(exit_code);
    }

    /// Appends captured output, up to the per-stream cap.
    pub fn capture(&mut self, stream: OutputStream, chunk: &[u8]) {
        let buf = match stream {
            OutputStream::Stdout => &mut self.stdout,
            OutputStream::Stderr => &mut self.stderr,
        };
        append_capped(buf, chunk);
    }

    /// Whether the task is terminal and finished longer than `retention`
    /// before `now`.
    #[must_use]
    pub fn expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        self.status.is_terminal()
            && self
                .finished_at
                .and_then(|at| (now - at).to_std().ok())
                .is_some_and(|age| age >= retention)
    }

    /// Wire view of the task.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            pid: self.pid,
            cmd: self.cmd.clone(),
            status: self.status,
            exit_code: self.exit_code,
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            timeout: self.timeout.map(|t| t.as_secs()),
        }
    }
}

/// Shared handle to one task entry.
pub type TaskEntry = Arc<Mutex<RpcTask>>;

/// All tasks known to a server, keyed by pid.
#[derive(Debug, Clone, Default)]
pub struct TaskTable {
    inner: Arc<Mutex<HashMap<i32, TaskEntry>>>,
}

impl TaskTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task and returns its entry. A task with the same pid
    /// (a recycled pid) is replaced.
    pub async fn insert(&self, task: RpcTask) -> TaskEntry {
        let pid = task.pid;
        let entry = Arc::new(Mutex::new(task));
        let replaced = self.inner.lock().await.insert(pid, Arc::clone(&entry));
        if replaced.is_some() {
            tracing::warn!(pid, "replacing task with recycled pid");
        }
        entry
    }

    /// Looks up a task entry.
    pub async fn entry(&self, pid: i32) -> Option<TaskEntry> {
        self.inner.lock().await.get(&pid).cloned()
    }

    async fn entries(&self) -> Vec<TaskEntry> {
        self.inner.lock().await.values().cloned().collect()
    }

    /// Pid to command line over every present task.
    pub async fn query(&self) -> BTreeMap<i32, String> {
        let mut out = BTreeMap::new();
        for entry in self.entries().await {
            let task = entry.lock().await;
            let _ = out.insert(task.pid, task.cmd.clone());
        }
        out
    }

    /// Snapshot of one task.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` for an unknown pid.
    pub async fn status(&self, pid: i32) -> Result<TaskSnapshot> {
        let entry = self.entry(pid).await.ok_or_else(|| unknown(pid))?;
        let task = entry.lock().await;
        Ok(task.snapshot())
    }

    /// Sends SIGTERM to the task's process group and marks it killed.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` for an unknown pid and
    /// `BurrowError::Config` for a task already in a terminal state; neither
    /// changes the table.
    pub async fn kill(&self, pid: i32) -> Result<TaskSnapshot> {
        let entry = self.entry(pid).await.ok_or_else(|| unknown(pid))?;
        let mut task = entry.lock().await;
        if task.status.is_terminal() {
            return Err(BurrowError::Config {
                message: format!("task {pid} is already {}", task.status),
            });
        }
        signal_group(pid, Signal::SIGTERM);
        task.mark(TaskStatus::Killed);
        tracing::info!(pid, cmd = %task.cmd, "task killed");
        Ok(task.snapshot())
    }

    /// Drops terminal tasks that finished more than `retention` ago and
    /// returns how many were removed.
    pub async fn collect_garbage(&self, retention: Duration) -> usize {
        let now = Utc::now();
        let mut expired = Vec::new();
        for entry in self.entries().await {
            let task = entry.lock().await;
            if task.expired(now, retention) {
                expired.push(task.pid);
            }
        }
        if expired.is_empty() {
            return 0;
        }
        let mut table = self.inner.lock().await;
        let mut removed = 0;
        for pid in expired {
            if table.remove(&pid).is_some() {
                removed += 1;
            }
        }
        drop(table);
        tracing::debug!(removed, "collected finished tasks");
        removed
    }

    /// Number of tasks present.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Whether the table is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

/// Sends `sig` to the process group led by `pid`. Errors (typically a
/// group that already exited) are only logged.
pub fn signal_group(pid: i32, sig: Signal) {
    if let Err(e) = signal::killpg(Pid::from_raw(pid), sig) {
        tracing::debug!(pid, signal = ?sig, error = %e, "signal to process group failed");
    }
}

fn append_capped(buf: &mut Vec<u8>, chunk: &[u8]) {
    let room = MAX_CAPTURED_OUTPUT.saturating_sub(buf.len());
    buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
}

fn unknown(pid: i32) -> BurrowError {
    BurrowError::NotFound {
        kind: "task",
        id: pid.to_string(),
    }
}
