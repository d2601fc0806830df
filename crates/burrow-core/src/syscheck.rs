//! Presence and permission checks of the support bundle.
//!
//! Every component in the support directory must exist, carry mode `0755`,
//! and have a `<name>.info` completeness marker next to it. Binary integrity
//! is verified by whoever installs the bundle.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use burrow_common::constants::{
    CACHE_COMPONENTS, COMPLETENESS_MARKER_SUFFIX, COMPONENT_MODE, EXECUTION_COMPONENTS,
    FAKED_SYSV, LIBFAKECHROOT, LIBFAKEROOT, MEMCACHED,
};
use burrow_common::error::{BurrowError, Result};

/// State of one support component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentState {
    /// Present, `0755`, marker written.
    Ready,
    /// The component file does not exist.
    Missing,
    /// The component exists with another mode.
    WrongMode(u32),
    /// The completeness marker is absent.
    Incomplete,
}

impl ComponentState {
    fn reason(&self) -> Option<String> {
        match self {
            Self::Ready => None,
            Self::Missing => Some("not installed".into()),
            Self::WrongMode(mode) => Some(format!("mode {mode:o}, expected {COMPONENT_MODE:o}")),
            Self::Incomplete => Some("completeness marker missing".into()),
        }
    }
}

/// Paths of the components needed to launch processes.
///
/// Only obtainable through [`SupportBundle::require_execution`], so holding
/// one proves the check ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionComponents {
    /// Directory holding the bundle; added to `LD_LIBRARY_PATH`.
    pub sys_dir: PathBuf,
    /// The chroot shim library.
    pub libfakechroot: PathBuf,
    /// The identity shim library.
    pub libfakeroot: PathBuf,
    /// The IPC shim daemon.
    pub faked: PathBuf,
}

/// The support directory and the state of its components.
#[derive(Debug, Clone)]
pub struct SupportBundle {
    dir: PathBuf,
    states: Vec<(&'static str, ComponentState)>,
}

impl SupportBundle {
    /// Inspects every known component under `dir`.
    #[must_use]
    pub fn inspect(dir: &Path) -> Self {
        let states = EXECUTION_COMPONENTS
            .iter()
            .chain(CACHE_COMPONENTS.iter())
            .map(|name| (*name, component_state(dir, name)))
            .collect();
        Self {
            dir: dir.to_path_buf(),
            states,
        }
    }

    /// The support directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// State of every component, in check order.
    #[must_use]
    pub fn states(&self) -> &[(&'static str, ComponentState)] {
        &self.states
    }

    /// Checks the execution components.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::MissingDependency` naming the first component
    /// that is absent, wrongly permissioned, or incomplete.
    pub fn require_execution(&self) -> Result<ExecutionComponents> {
        for name in EXECUTION_COMPONENTS {
            self.require(name)?;
        }
        Ok(ExecutionComponents {
            sys_dir: self.dir.clone(),
            libfakechroot: self.dir.join(LIBFAKECHROOT),
            libfakeroot: self.dir.join(LIBFAKEROOT),
            faked: self.dir.join(FAKED_SYSV),
        })
    }

    /// Checks the cache server binary and returns its path.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::MissingDependency` if it is unusable.
    pub fn require_cache(&self) -> Result<PathBuf> {
        self.require(MEMCACHED)?;
        Ok(self.dir.join(MEMCACHED))
    }

    fn require(&self, name: &str) -> Result<()> {
        let state = self
            .states
            .iter()
            .find(|(component, _)| *component == name)
            .map_or(ComponentState::Missing, |(_, state)| state.clone());
        match state.reason() {
            None => Ok(()),
            Some(reason) => {
                tracing::debug!(component = name, %reason, "support component rejected");
                Err(BurrowError::MissingDependency {
                    component: name.to_string(),
                    reason,
                })
            }
        }
    }
}

fn component_state(dir: &Path, name: &str) -> ComponentState {
    let path = dir.join(name);
    let Ok(meta) = fs::metadata(&path) else {
        return ComponentState::Missing;
    };
    let mode = meta.permissions().mode() & 0o7777;
    if mode != COMPONENT_MODE {
        return ComponentState::WrongMode(mode);
    }
    if !dir.join(format!("{name}{COMPLETENESS_MARKER_SUFFIX}")).is_file() {
        return ComponentState::Incomplete;
    }
    ComponentState::Ready
}

/// Installs one component with the expected mode and marker.
///
/// Used by `init` when unpacking a dependency bundle.
///
/// # Errors
///
/// Returns an error if the file cannot be written or its mode set.
pub fn install_component(dir: &Path, name: &str, contents: &[u8]) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| BurrowError::io(dir, e))?;
    let path = dir.join(name);
    fs::write(&path, contents).map_err(|e| BurrowError::io(&path, e))?;
    mark_ready(dir, name)
}

/// Sets the expected mode on an existing component and writes its marker.
///
/// # Errors
///
/// Returns an error if the component is absent or cannot be updated.
pub fn mark_ready(dir: &Path, name: &str) -> Result<()> {
    let path = dir.join(name);
    fs::set_permissions(&path, fs::Permissions::from_mode(COMPONENT_MODE))
        .map_err(|e| BurrowError::io(&path, e))?;
    let marker = dir.join(format!("{name}{COMPLETENESS_MARKER_SUFFIX}"));
    fs::write(&marker, burrow_common::constants::VERSION).map_err(|e| BurrowError::io(&marker, e))
}
