//! Blocking client for the remote execution service.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use burrow_common::error::{BurrowError, Result};

use crate::protocol::{
    ExecParams, ExecResult, Method, PidParams, Request, Response, TaskSnapshot, encode_line,
};

/// Connection attempts before the server is reported unavailable.
const CONNECT_RETRIES: u32 = 3;
/// Delay between connection attempts.
const CONNECT_RETRY_DELAY_MS: u64 = 300;
/// Read timeout for one response.
const READ_TIMEOUT_SECS: u64 = 30;

/// Talks to one RPC server.
#[derive(Debug, Clone)]
pub struct RpcClient {
    ip: String,
    port: u16,
}

impl RpcClient {
    /// A client for the server at `ip:port`.
    #[must_use]
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// Starts a command and returns its pid.
    ///
    /// # Errors
    ///
    /// Returns the server's error, or `ExternalServiceUnavailable` if it
    /// cannot be reached.
    pub fn exec(&self, params: &ExecParams) -> Result<i32> {
        let result: ExecResult = self.call(Method::Exec, params)?;
        Ok(result.pid)
    }

    /// Lists every task the server knows about.
    ///
    /// # Errors
    ///
    /// As [`RpcClient::exec`].
    pub fn query(&self) -> Result<BTreeMap<i32, String>> {
        self.call(Method::Query, &serde_json::json!({}))
    }

    /// Terminates a running task.
    ///
    /// # Errors
    ///
    /// As [`RpcClient::exec`]; `NotFound` for an unknown pid.
    pub fn kill(&self, pid: i32) -> Result<TaskSnapshot> {
        self.call(Method::Kill, &PidParams { pid })
    }

    /// Fetches a task snapshot.
    ///
    /// # Errors
    ///
    /// As [`RpcClient::kill`].
    pub fn status(&self, pid: i32) -> Result<TaskSnapshot> {
        self.call(Method::Status, &PidParams { pid })
    }

    fn call<P: Serialize, T: DeserializeOwned>(&self, method: Method, params: &P) -> Result<T> {
        let payload = encode_line(&Request::new(method, params)?)?;
        let mut stream = self.connect()?;
        let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

        stream
            .write_all(payload.as_bytes())
            .map_err(|e| self.unavailable(&e))?;

        let mut reader = BufReader::new(&stream);
        let mut line = String::new();
        let _bytes = reader
            .read_line(&mut line)
            .map_err(|e| self.unavailable(&e))?;
        if line.trim().is_empty() {
            return Err(BurrowError::ExternalServiceUnavailable {
                service: "rpc server",
                message: format!("empty response from {}:{}", self.ip, self.port),
            });
        }

        let response: Response = serde_json::from_str(&line)?;
        let value = response.into_result()?;
        Ok(serde_json::from_value(value)?)
    }

    fn connect(&self) -> Result<TcpStream> {
        let mut last_err = None;
        for attempt in 0..CONNECT_RETRIES {
            if attempt > 0 {
                std::thread::sleep(Duration::from_millis(CONNECT_RETRY_DELAY_MS));
            }
            match TcpStream::connect((self.ip.as_str(), self.port)) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "rpc connect failed, retrying");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.map_or_else(
            || BurrowError::ExternalServiceUnavailable {
                service: "rpc server",
                message: "no connection attempt made".into(),
            },
            |e| self.unavailable(&e),
        ))
    }

    fn unavailable(&self, e: &std::io::Error) -> BurrowError {
        BurrowError::ExternalServiceUnavailable {
            service: "rpc server",
            message: format!("{}:{}: {e}", self.ip, self.port),
        }
    }
}
