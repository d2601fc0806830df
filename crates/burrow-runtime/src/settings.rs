//! Run settings file (`setting.yml`).
//!
//! ```yaml
//! image: ubuntu:22.04      # or omit and set rootfs
//! rootfs: ./rootfs         # relative to the source directory
//! name: build-box
//! command: ["/bin/bash", "-l"]
//! env:
//!   LANG: C.UTF-8
//! working_dir: /work
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use burrow_common::constants::SETTINGS_FILE;
use burrow_common::error::{BurrowError, Result};

/// Contents of a run settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSettings {
    /// Image reference (`name[:tag]`) to build the container from.
    #[serde(default)]
    pub image: Option<String>,
    /// Rootfs directory used when no image is named.
    #[serde(default)]
    pub rootfs: Option<PathBuf>,
    /// Container name.
    #[serde(default)]
    pub name: Option<String>,
    /// Default command.
    #[serde(default)]
    pub command: Vec<String>,
    /// Extra environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory inside the root.
    #[serde(default)]
    pub working_dir: Option<String>,
}

impl RunSettings {
    /// Parses settings from YAML text.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Config` for invalid YAML or when both `image`
    /// and `rootfs` are set.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(content).map_err(|e| BurrowError::Config {
            message: format!("invalid run settings: {e}"),
        })?;
        if settings.image.is_some() && settings.rootfs.is_some() {
            return Err(BurrowError::Config {
                message: "run settings name both an image and a rootfs".into(),
            });
        }
        Ok(settings)
    }

    /// Reads settings from `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or as
    /// [`RunSettings::from_yaml`].
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "loading run settings");
        let content = std::fs::read_to_string(path).map_err(|e| BurrowError::io(path, e))?;
        Self::from_yaml(&content)
    }

    /// The rootfs directory for a container built from `source_dir` without
    /// an image: `rootfs` resolved against it, or the directory itself.
    #[must_use]
    pub fn rootfs_dir(&self, source_dir: &Path) -> PathBuf {
        self.rootfs
            .as_ref()
            .map_or_else(|| source_dir.to_path_buf(), |r| source_dir.join(r))
    }
}

/// Finds the settings file for a run: `config` when given, otherwise
/// `setting.yml` inside `source_dir`.
///
/// # Errors
///
/// Returns `BurrowError::NotFound` if the file does not exist.
pub fn locate(source_dir: &Path, config: Option<&Path>) -> Result<PathBuf> {
    let path = config.map_or_else(|| source_dir.join(SETTINGS_FILE), Path::to_path_buf);
    if path.is_file() {
        Ok(path)
    } else {
        Err(BurrowError::NotFound {
            kind: "settings file",
            id: path.display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_image_settings() {
        let settings = RunSettings::from_yaml(
            "image: ubuntu:22.04\nname: box\ncommand: [/bin/bash, -l]\nenv:\n  LANG: C.UTF-8\n",
        )
        .expect("parse");
        assert_eq!(settings.image.as_deref(), Some("ubuntu:22.04"));
        assert_eq!(settings.command, vec!["/bin/bash", "-l"]);
        assert_eq!(settings.env.get("LANG").map(String::as_str), Some("C.UTF-8"));
    }

    #[test]
    fn empty_settings_use_source_as_rootfs() {
        let settings = RunSettings::from_yaml("{}").expect("parse");
        assert_eq!(settings.rootfs_dir(Path::new("/src")), Path::new("/src"));

        let settings = RunSettings::from_yaml("rootfs: fs").expect("parse");
        assert_eq!(settings.rootfs_dir(Path::new("/src")), Path::new("/src/fs"));
    }

    #[test]
    fn rejects_unknown_keys_and_conflicting_bases() {
        assert_eq!(
            RunSettings::from_yaml("imgae: x").unwrap_err().kind(),
            "config"
        );
        assert_eq!(
            RunSettings::from_yaml("image: x\nrootfs: y").unwrap_err().kind(),
            "config"
        );
    }

    #[test]
    fn locate_prefers_explicit_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(locate(dir.path(), None).unwrap_err().kind(), "not_found");
        std::fs::write(dir.path().join(SETTINGS_FILE), "{}").expect("write");
        assert_eq!(
            locate(dir.path(), None).expect("locate"),
            dir.path().join(SETTINGS_FILE)
        );
        let other = dir.path().join("other.yml");
        std::fs::write(&other, "{}").expect("write");
        assert_eq!(locate(dir.path(), Some(&other)).expect("locate"), other);
    }
}
