//! Unified error type for the burrow workspace.
//!
//! Every library crate returns [`BurrowError`]; the CLI wraps it in
//! `anyhow` at the binary edge. [`BurrowError::kind`] gives the stable
//! code that crosses the RPC wire.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum BurrowError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value or requested state change is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A container, image, layer, or task is unknown.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A required support component is absent or has the wrong mode.
    #[error("missing dependency {component}: {reason}")]
    MissingDependency {
        /// Name of the missing component.
        component: String,
        /// Why the component was rejected.
        reason: String,
    },

    /// Image metadata is cyclic or inconsistent.
    #[error("corrupt image {image}: {message}")]
    CorruptImage {
        /// Image reference whose metadata is corrupt.
        image: String,
        /// Description of the inconsistency.
        message: String,
    },

    /// A downloaded or ingested blob does not match its digest.
    #[error("integrity check failed for {resource}: expected {expected}, got {actual}")]
    Integrity {
        /// Resource that failed validation.
        resource: String,
        /// Expected digest.
        expected: String,
        /// Actual computed digest.
        actual: String,
    },

    /// User input does not follow the required format.
    #[error("malformed input {input:?}: {message}")]
    MalformedInput {
        /// The rejected input.
        input: String,
        /// Expected format.
        message: String,
    },

    /// An operation exceeded its time bound.
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Bound that elapsed, in seconds.
        seconds: u64,
    },

    /// An external service (the settings cache) cannot be reached.
    #[error("{service} unavailable: {message}")]
    ExternalServiceUnavailable {
        /// Name of the service.
        service: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// The remote image registry rejected a request.
    #[error("registry error: {message}")]
    Registry {
        /// Description of the registry failure.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl BurrowError {
    /// Wraps an I/O error with the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the stable snake_case code of this error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::Config { .. } => "config",
            Self::NotFound { .. } => "not_found",
            Self::MissingDependency { .. } => "missing_dependency",
            Self::CorruptImage { .. } => "corrupt_image",
            Self::Integrity { .. } => "integrity",
            Self::MalformedInput { .. } => "malformed_input",
            Self::Timeout { .. } => "timeout",
            Self::ExternalServiceUnavailable { .. } => "external_service_unavailable",
            Self::Registry { .. } => "registry",
            Self::Serialization { .. } => "serialization",
        }
    }

    /// Whether a command that only uses the settings cache for acceleration
    /// may continue after this error.
    #[must_use]
    pub const fn is_degradable(&self) -> bool {
        matches!(
            self,
            Self::ExternalServiceUnavailable { .. } | Self::MissingDependency { .. }
        )
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BurrowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_codes_are_snake_case() {
        let err = BurrowError::NotFound {
            kind: "container",
            id: "abc".into(),
        };
        assert_eq!(err.kind(), "not_found");
        assert_eq!(err.to_string(), "container not found: abc");
    }

    #[test]
    fn cache_errors_are_degradable() {
        let err = BurrowError::ExternalServiceUnavailable {
            service: "settings cache",
            message: "connection refused".into(),
        };
        assert!(err.is_degradable());
        let err = BurrowError::Integrity {
            resource: "layer".into(),
            expected: "a".into(),
            actual: "b".into(),
        };
        assert!(!err.is_degradable());
    }
}
