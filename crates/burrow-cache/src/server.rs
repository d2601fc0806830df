//! Start-if-absent for the cache server.

use std::net::SocketAddr;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use burrow_common::error::{BurrowError, Result};

use crate::SettingsCache;
use crate::client::MemcachedClient;

/// How long to wait for a freshly started server to answer.
pub const START_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay between reachability polls.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Returns a client for `addr`, starting `binary` first if nothing answers.
///
/// The server is started daemonized (`-d`) bound to the address's host and
/// port, then polled until it replies to `version`.
///
/// # Errors
///
/// Returns an I/O error if the binary cannot be spawned, or
/// `BurrowError::Timeout` if it never becomes reachable.
pub fn ensure_running(addr: SocketAddr, binary: &Path) -> Result<MemcachedClient> {
    let client = MemcachedClient::new(addr).with_timeout(Duration::from_millis(500));
    if client.ping().is_ok() {
        tracing::debug!(%addr, "settings cache already running");
        return Ok(client);
    }

    tracing::info!(%addr, binary = %binary.display(), "starting settings cache");
    let status = Command::new(binary)
        .arg("-d")
        .arg("-l")
        .arg(addr.ip().to_string())
        .arg("-p")
        .arg(addr.port().to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| BurrowError::io(binary, e))?;
    if !status.success() {
        return Err(BurrowError::ExternalServiceUnavailable {
            service: crate::SERVICE_NAME,
            message: format!("{} exited with {status}", binary.display()),
        });
    }

    wait_until_reachable(&client, START_TIMEOUT)?;
    Ok(client)
}

/// Polls `client` until it answers or `timeout` elapses.
///
/// # Errors
///
/// Returns `BurrowError::Timeout` on expiry.
pub fn wait_until_reachable(client: &MemcachedClient, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if client.ping().is_ok() {
            tracing::info!(addr = %client.addr(), "settings cache is ready");
            return Ok(());
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    Err(BurrowError::Timeout {
        operation: format!("settings cache startup at {}", client.addr()),
        seconds: timeout.as_secs(),
    })
}
