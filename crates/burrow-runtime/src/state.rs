//! Persistent state management.
//!
//! Maintains a local JSON index of all containers and their current
//! states, enabling daemon-less lifecycle management. Writes go to a
//! temporary file that is renamed over the index.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use nix::sys::signal;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use burrow_common::error::{BurrowError, Result};
use burrow_common::types::ContainerId;

use crate::container::ContainerRecord;

/// On-disk container index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateIndex {
    /// All known containers.
    pub containers: Vec<ContainerRecord>,
}

impl StateIndex {
    /// Finds a container by id.
    #[must_use]
    pub fn get(&self, id: &ContainerId) -> Option<&ContainerRecord> {
        self.containers.iter().find(|c| &c.id == id)
    }

    /// Finds the container created from `source_dir`.
    #[must_use]
    pub fn find_by_source(&self, source_dir: &Path) -> Option<&ContainerRecord> {
        self.containers.iter().find(|c| c.source_dir == source_dir)
    }

    /// Inserts a record or replaces the one with the same id.
    pub fn upsert(&mut self, record: ContainerRecord) {
        match self.containers.iter_mut().find(|c| c.id == record.id) {
            Some(existing) => *existing = record,
            None => self.containers.push(record),
        }
    }

    /// Removes a record, returning it if it existed.
    pub fn remove(&mut self, id: &ContainerId) -> Option<ContainerRecord> {
        let pos = self.containers.iter().position(|c| &c.id == id)?;
        Some(self.containers.remove(pos))
    }
}

/// Loads the state index from disk. A missing file is an empty index.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_state(path: &Path) -> Result<StateIndex> {
    tracing::debug!(path = %path.display(), "loading state index");
    match fs::read_to_string(path) {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(StateIndex::default()),
        Err(e) => Err(BurrowError::io(path, e)),
    }
}

/// Persists the state index to disk atomically.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save_state(path: &Path, index: &StateIndex) -> Result<()> {
    tracing::debug!(path = %path.display(), containers = index.containers.len(), "saving state index");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BurrowError::io(parent, e))?;
    }
    let content = serde_json::to_string_pretty(index)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).map_err(|e| BurrowError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| BurrowError::io(path, e))?;
    Ok(())
}

/// Distinguishes staged lock files of concurrent claims within one process.
static STAGED_SEQ: AtomicU64 = AtomicU64::new(0);

/// Exclusive claim on one container's lifecycle, held across processes
/// through a lock file holding the owner's pid.
///
/// A lock left behind by a process that no longer exists is taken over.
#[derive(Debug)]
pub struct LifecycleLock {
    path: PathBuf,
}

impl LifecycleLock {
    /// Claims `id` under `locks_dir`.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Config` if a live process holds the lock.
    pub fn acquire(locks_dir: &Path, id: &ContainerId) -> Result<Self> {
        fs::create_dir_all(locks_dir).map_err(|e| BurrowError::io(locks_dir, e))?;
        let path = locks_dir.join(format!("{id}.lock"));
        let staged = locks_dir.join(format!(
            "{id}.lock.{}.{}",
            std::process::id(),
            STAGED_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&staged, std::process::id().to_string())
            .map_err(|e| BurrowError::io(&staged, e))?;
        let claimed = Self::claim(&staged, &path, id);
        let _ = fs::remove_file(&staged);
        claimed
    }

    /// Links the staged pid file into place, so the lock file never exists
    /// without its owner's pid.
    fn claim(staged: &Path, path: &Path, id: &ContainerId) -> Result<Self> {
        for _ in 0..2 {
            match fs::hard_link(staged, path) {
                Ok(()) => {
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if let Some(owner) = live_owner(path) {
                        return Err(BurrowError::Config {
                            message: format!("container {id} is busy (held by pid {owner})"),
                        });
                    }
                    tracing::warn!(id = %id, "taking over stale container lock");
                    let _ = fs::remove_file(path);
                }
                Err(e) => return Err(BurrowError::io(path, e)),
            }
        }
        Err(BurrowError::Config {
            message: format!("container {id} lock could not be taken"),
        })
    }
}

impl Drop for LifecycleLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn live_owner(path: &Path) -> Option<i32> {
    let pid = fs::read_to_string(path).ok()?.trim().parse::<i32>().ok()?;
    (pid > 0 && signal::kill(Pid::from_raw(pid), None).is_ok()).then_some(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerBase;

    fn record(id: &str, source: &str) -> ContainerRecord {
        ContainerRecord::new(
            ContainerId::new(id),
            PathBuf::from(source),
            &PathBuf::from("/data/containers").join(id),
            ContainerBase::Directory {
                path: PathBuf::from(source),
            },
        )
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let mut index = StateIndex::default();
        index.upsert(record("a1", "/src/a"));
        index.upsert(record("b2", "/src/b"));
        save_state(&path, &index).expect("save");

        let loaded = load_state(&path).expect("load");
        assert_eq!(loaded.containers.len(), 2);
        assert_eq!(
            loaded.find_by_source(Path::new("/src/b")).map(|c| c.id.as_str()),
            Some("b2")
        );
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn missing_file_is_empty_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = load_state(&dir.path().join("none.json")).expect("load");
        assert!(index.containers.is_empty());
    }

    #[test]
    fn upsert_replaces_and_remove_reports_absence() {
        let mut index = StateIndex::default();
        index.upsert(record("a1", "/src/a"));
        let mut updated = record("a1", "/src/a");
        updated.name = Some("web".into());
        index.upsert(updated);
        assert_eq!(index.containers.len(), 1);
        assert_eq!(index.containers[0].name.as_deref(), Some("web"));

        let id = ContainerId::new("a1");
        assert!(index.remove(&id).is_some());
        assert!(index.remove(&id).is_none());
    }

    #[test]
    fn lock_is_exclusive_and_released_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let id = ContainerId::new("a1");
        let lock = LifecycleLock::acquire(dir.path(), &id).expect("first");
        assert_eq!(
            LifecycleLock::acquire(dir.path(), &id).unwrap_err().kind(),
            "config"
        );
        drop(lock);
        let _again = LifecycleLock::acquire(dir.path(), &id).expect("after drop");
    }

    #[test]
    fn lock_file_carries_owner_pid_from_the_start() {
        let dir = tempfile::tempdir().expect("tempdir");
        let id = ContainerId::new("a1");
        let _lock = LifecycleLock::acquire(dir.path(), &id).expect("lock");
        let content = fs::read_to_string(dir.path().join("a1.lock")).expect("read");
        assert_eq!(content, std::process::id().to_string());
        let entries: Vec<_> = fs::read_dir(dir.path()).expect("read dir").collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn stale_lock_is_taken_over() {
        let dir = tempfile::tempdir().expect("tempdir");
        let id = ContainerId::new("a1");
        fs::write(dir.path().join("a1.lock"), "0").expect("write");
        let _lock = LifecycleLock::acquire(dir.path(), &id).expect("take over");
    }
}
