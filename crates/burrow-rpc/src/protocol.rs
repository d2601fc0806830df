//! Wire protocol.
//!
//! One JSON object per line in each direction. Requests are
//! `{"method": "...", "params": {...}}`; responses are either
//! `{"result": ...}` or `{"error": {"kind": "...", "message": "..."}}`,
//! where `kind` is the snake_case error kind of [`BurrowError::kind`].

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use burrow_common::error::{BurrowError, Result};
use burrow_common::types::TaskStatus;

/// A request line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Method name.
    pub method: String,
    /// Method parameters; absent means `{}`.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Request {
    /// Builds a request from a method and typed parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters cannot be serialized.
    pub fn new<P: Serialize>(method: Method, params: &P) -> Result<Self> {
        Ok(Self {
            method: method.as_str().to_string(),
            params: serde_json::to_value(params)?,
        })
    }

    /// Decodes the parameters into `P`.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::MalformedInput` if they do not match.
    pub fn params<P: DeserializeOwned>(&self) -> Result<P> {
        let value = if self.params.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            self.params.clone()
        };
        serde_json::from_value(value).map_err(|e| BurrowError::MalformedInput {
            input: self.params.to_string(),
            message: format!("invalid {} parameters: {e}", self.method),
        })
    }
}

/// Methods understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Spawn a command.
    Exec,
    /// List present tasks.
    Query,
    /// Terminate a task.
    Kill,
    /// Snapshot one task.
    Status,
}

impl Method {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exec => "exec",
            Self::Query => "query",
            Self::Kill => "kill",
            Self::Status => "status",
        }
    }

    /// Parses a wire name.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::MalformedInput` for an unknown method.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "exec" => Ok(Self::Exec),
            "query" => Ok(Self::Query),
            "kill" => Ok(Self::Kill),
            "status" => Ok(Self::Status),
            other => Err(BurrowError::MalformedInput {
                input: other.to_string(),
                message: "unknown method".into(),
            }),
        }
    }
}

/// Parameters of `exec`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecParams {
    /// Program to run.
    pub cmd: String,
    /// Program arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Seconds after which the process group is killed.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Container to run in; the host when absent.
    #[serde(default)]
    pub container: Option<String>,
}

impl ExecParams {
    /// The command line as recorded in the task table.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.cmd.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Parameters of `kill` and `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidParams {
    /// Task pid.
    pub pid: i32,
}

/// Result of `exec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    /// Pid of the spawned process.
    pub pid: i32,
}

/// Point-in-time view of a task, returned by `status` and `kill`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Process id.
    pub pid: i32,
    /// Command line.
    pub cmd: String,
    /// Current status.
    pub status: TaskStatus,
    /// Exit code once the process has been reaped.
    pub exit_code: Option<i32>,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
    /// Spawn time.
    pub started_at: DateTime<Utc>,
    /// Time the task reached its final state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Timeout in seconds, if any.
    pub timeout: Option<u64>,
}

/// Error payload of a failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Stable error kind.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl From<&BurrowError> for WireError {
    fn from(err: &BurrowError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

impl WireError {
    /// Converts a remote error back into a local one, keeping the kind
    /// where it carries meaning for callers.
    #[must_use]
    pub fn into_error(self) -> BurrowError {
        match self.kind.as_str() {
            "not_found" => BurrowError::NotFound {
                kind: "remote task",
                id: self.message,
            },
            "malformed_input" => BurrowError::MalformedInput {
                input: String::new(),
                message: self.message,
            },
            _ => BurrowError::Config {
                message: format!("rpc server error ({}): {}", self.kind, self.message),
            },
        }
    }
}

/// A response line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    /// Successful result.
    Result(serde_json::Value),
    /// Failure.
    Error(WireError),
}

impl Response {
    /// Wraps an operation outcome.
    #[must_use]
    pub fn from_result(result: Result<serde_json::Value>) -> Self {
        match result {
            Ok(value) => Self::Result(value),
            Err(e) => Self::Error(WireError::from(&e)),
        }
    }

    /// Unwraps into a local result.
    ///
    /// # Errors
    ///
    /// Returns the remote error converted by [`WireError::into_error`].
    pub fn into_result(self) -> Result<serde_json::Value> {
        match self {
            Self::Result(value) => Ok(value),
            Self::Error(e) => Err(e.into_error()),
        }
    }
}

/// Serializes `value` as one line, newline included.
///
/// # Errors
///
/// Returns an error if `value` cannot be serialized.
pub fn encode_line<T: Serialize>(value: &T) -> Result<String> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_without_params_decodes_empty_struct() {
        #[derive(Deserialize)]
        struct Nothing {}

        let request: Request = serde_json::from_str(r#"{"method":"query"}"#).unwrap();
        assert_eq!(Method::parse(&request.method).unwrap(), Method::Query);
        let _: Nothing = request.params().unwrap();
    }

    #[test]
    fn exec_params_default_optional_fields() {
        let request: Request =
            serde_json::from_str(r#"{"method":"exec","params":{"cmd":"ls"}}"#).unwrap();
        let params: ExecParams = request.params().unwrap();
        assert_eq!(params.cmd, "ls");
        assert!(params.args.is_empty());
        assert!(params.timeout.is_none());
        assert!(params.container.is_none());
    }

    #[test]
    fn bad_params_are_malformed_input() {
        let request: Request =
            serde_json::from_str(r#"{"method":"kill","params":{"pid":"x"}}"#).unwrap();
        let err = request.params::<PidParams>().unwrap_err();
        assert_eq!(err.kind(), "malformed_input");
        assert_eq!(Method::parse("reboot").unwrap_err().kind(), "malformed_input");
    }

    #[test]
    fn error_response_shape() {
        let err = BurrowError::NotFound {
            kind: "task",
            id: "42".into(),
        };
        let line = encode_line(&Response::from_result(Err(err))).unwrap();
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["error"]["kind"], "not_found");

        let back: Response = serde_json::from_str(&line).unwrap();
        assert_eq!(back.into_result().unwrap_err().kind(), "not_found");
    }

    #[test]
    fn command_line_joins_args() {
        let params = ExecParams {
            cmd: "echo".into(),
            args: vec!["a".into(), "b".into()],
            ..ExecParams::default()
        };
        assert_eq!(params.command_line(), "echo a b");
    }
}
