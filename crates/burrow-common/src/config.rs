//! Configuration model for a single burrow invocation.
//!
//! A [`BurrowConfig`] is built once per command and passed by reference
//! into every component; there is no process-wide mutable configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{BurrowError, Result};

/// Root configuration for the burrow runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurrowConfig {
    /// Base directory for all burrow state and data.
    pub data_dir: PathBuf,
    /// Address of the settings cache server.
    pub cache_addr: SocketAddr,
    /// Registry host used when an image reference names none.
    pub registry: String,
}

impl BurrowConfig {
    /// Builds a configuration rooted at `data_dir` with default settings.
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache_addr: SocketAddr::from(([127, 0, 0, 1], 11211)),
            registry: constants::DEFAULT_REGISTRY.to_string(),
        }
    }

    /// Builds the configuration for this invocation.
    ///
    /// `data_dir` overrides the resolved default; `cache_addr` overrides
    /// [`constants::DEFAULT_CACHE_ADDR`].
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Config` if `cache_addr` is not a socket address.
    pub fn resolve(data_dir: Option<PathBuf>, cache_addr: Option<&str>) -> Result<Self> {
        let mut config =
            Self::with_data_dir(data_dir.unwrap_or_else(|| constants::data_dir().clone()));
        let addr = cache_addr.unwrap_or(constants::DEFAULT_CACHE_ADDR);
        config.cache_addr = addr.parse().map_err(|_| BurrowError::Config {
            message: format!("invalid cache address: {addr}"),
        })?;
        Ok(config)
    }

    /// Directory holding the interposition components.
    #[must_use]
    pub fn sys_dir(&self) -> PathBuf {
        self.data_dir.join(constants::SYS_DIR_NAME)
    }

    /// Container registry file.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join(constants::STATE_FILE)
    }

    /// Root of the content-addressed layer and blob store.
    #[must_use]
    pub fn store_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Per-container directory holding the writable layer and root.
    #[must_use]
    pub fn container_dir(&self, id: &str) -> PathBuf {
        self.data_dir.join("containers").join(id)
    }

    /// Directory receiving offline image packages.
    #[must_use]
    pub fn package_dir(&self) -> PathBuf {
        self.data_dir.join("package")
    }

    /// Directory receiving wrapper scripts written by `expose`.
    #[must_use]
    pub fn expose_dir(&self) -> PathBuf {
        self.data_dir.join("bin")
    }
}

impl Default for BurrowConfig {
    fn default() -> Self {
        Self::with_data_dir(constants::data_dir().clone())
    }
}
