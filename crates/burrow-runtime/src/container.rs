//! Container record and lifecycle transitions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use burrow_common::error::{BurrowError, Result};
use burrow_common::types::{ContainerId, ContainerStatus, Digest};
use burrow_core::remap::RemapTable;

/// What a container's read-only layers come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContainerBase {
    /// An image from the catalog and its layers, bottom to top.
    Image {
        /// Image name.
        name: String,
        /// Image tag.
        tag: String,
        /// Layer digests, bottom to top.
        layer_stack: Vec<Digest>,
    },
    /// A plain directory used as the only read-only layer.
    Directory {
        /// The rootfs directory.
        path: PathBuf,
    },
}

impl ContainerBase {
    /// Short description for listings.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Image { name, tag, .. } => format!("{name}:{tag}"),
            Self::Directory { path } => path.display().to_string(),
        }
    }
}

/// A container instance as kept in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Unique identifier.
    pub id: ContainerId,
    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,
    /// Directory the container was created from.
    pub source_dir: PathBuf,
    /// Assembled root the process sees.
    pub root_path: PathBuf,
    /// Writable layer holding the container's changes.
    pub writable_path: PathBuf,
    /// Read-only layers.
    pub base: ContainerBase,
    /// Current lifecycle state.
    pub status: ContainerStatus,
    /// Path substitutions applied to programs.
    #[serde(default)]
    pub remap_table: RemapTable,
    /// Command run when none is given.
    #[serde(default)]
    pub command: Vec<String>,
    /// Environment passed to every process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory inside the root.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl ContainerRecord {
    /// Creates a record in the `Created` state whose writable layer and
    /// root live under `container_dir`.
    #[must_use]
    pub fn new(id: ContainerId, source_dir: PathBuf, container_dir: &Path, base: ContainerBase) -> Self {
        Self {
            id,
            name: None,
            source_dir,
            root_path: container_dir.join("root"),
            writable_path: container_dir.join("rw"),
            base,
            status: ContainerStatus::Created,
            remap_table: RemapTable::new(),
            command: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            created_at: Utc::now(),
        }
    }

    /// Moves the record to `next`.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Config` if the transition is not allowed.
    pub fn transition(&mut self, next: ContainerStatus) -> Result<()> {
        if !self.status.can_transition(next) {
            return Err(BurrowError::Config {
                message: format!("container {} cannot go from {} to {next}", self.id, self.status),
            });
        }
        tracing::debug!(id = %self.id, from = %self.status, to = %next, "container status change");
        self.status = next;
        Ok(())
    }

    /// Directory holding the writable layer and root.
    #[must_use]
    pub fn container_dir(&self) -> &Path {
        self.writable_path.parent().unwrap_or(&self.writable_path)
    }

    /// Display name: the given name or the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.id.as_str())
    }

    /// Environment as `KEY=VALUE` pairs.
    #[must_use]
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        self.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ContainerRecord {
        ContainerRecord::new(
            ContainerId::new("abc123"),
            PathBuf::from("/src"),
            Path::new("/data/containers/abc123"),
            ContainerBase::Directory {
                path: PathBuf::from("/src"),
            },
        )
    }

    #[test]
    fn new_record_is_created_with_layout_under_container_dir() {
        let c = record();
        assert_eq!(c.status, ContainerStatus::Created);
        assert_eq!(c.writable_path, Path::new("/data/containers/abc123/rw"));
        assert_eq!(c.root_path, Path::new("/data/containers/abc123/root"));
        assert_eq!(c.container_dir(), Path::new("/data/containers/abc123"));
        assert_eq!(c.display_name(), "abc123");
    }

    #[test]
    fn destroyed_record_cannot_run_again() {
        let mut c = record();
        c.transition(ContainerStatus::Running).expect("run");
        c.transition(ContainerStatus::Stopped).expect("stop");
        c.transition(ContainerStatus::Running).expect("resume");
        c.transition(ContainerStatus::Destroyed).expect("destroy");
        assert_eq!(
            c.transition(ContainerStatus::Running).unwrap_err().kind(),
            "config"
        );
        assert_eq!(c.status, ContainerStatus::Destroyed);
    }

    #[test]
    fn base_serializes_with_kind_tag() {
        let json = serde_json::to_string(&record().base).expect("serialize");
        assert!(json.contains(r#""kind":"directory""#));
    }
}
