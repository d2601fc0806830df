//! Domain primitive types used across the burrow workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BurrowError, Result};

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random 12-character container ID.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(12);
        Self(id)
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 content digest identifying a layer blob.
///
/// Serialized in the OCI `sha256:<hex>` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Parses either `sha256:<hex>` or a bare 64-character hex string.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::MalformedInput` if the input is not a valid
    /// SHA-256 digest.
    pub fn parse(value: &str) -> Result<Self> {
        let hex = value.strip_prefix("sha256:").unwrap_or(value);
        if hex.len() != crate::constants::SHA256_HEX_LENGTH
            || !hex.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(BurrowError::MalformedInput {
                input: value.to_string(),
                message: "expected a sha256 digest".into(),
            });
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Builds a digest from raw SHA-256 output.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        use std::fmt::Write as _;
        let mut hex = String::with_capacity(crate::constants::SHA256_HEX_LENGTH);
        for byte in bytes {
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    /// Returns the hex-encoded hash without the algorithm prefix.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

impl TryFrom<String> for Digest {
    type Error = BurrowError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_string()
    }
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    /// Registered, never launched.
    Created,
    /// A launched process is live.
    Running,
    /// The last launched process exited.
    Stopped,
    /// Removal has started; the record disappears once it completes.
    Destroyed,
}

impl ContainerStatus {
    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Status only moves forward, except `Stopped -> Running` (resume).
    /// Relaunching a `Running` record is accepted as well, since the
    /// previous process may have died without the record being updated.
    #[must_use]
    pub const fn can_transition(self, next: Self) -> bool {
        match (self, next) {
            (Self::Destroyed, Self::Destroyed) => true,
            (Self::Destroyed, _) => false,
            (_, Self::Destroyed) => true,
            (Self::Created, Self::Running | Self::Stopped)
            | (Self::Running | Self::Stopped, Self::Running | Self::Stopped) => true,
            (_, Self::Created) => matches!(self, Self::Created),
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Lifecycle state of a remotely executed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// The process is live.
    Running,
    /// The process exited on its own.
    Completed,
    /// The process was terminated through `kill`.
    Killed,
    /// The watcher killed the process when its timeout elapsed.
    TimedOut,
}

impl TaskStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Killed => write!(f, "killed"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}
