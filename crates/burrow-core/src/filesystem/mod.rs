//! Filesystem management for emulated container roots.
//!
//! Provides the union lookup over layer directories, copy-composition of
//! an assembled root, and capture of a root's changes as a writable layer.
//! No mount is ever issued.

pub mod compose;
pub mod diff;
pub mod union;

use std::ffi::OsStr;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use burrow_common::constants::{WHITEOUT_OPAQUE, WHITEOUT_PREFIX};
use burrow_common::error::{BurrowError, Result};

/// Normalizes a container path into a path relative to a layer root.
///
/// # Errors
///
/// Returns `BurrowError::MalformedInput` if the path climbs above the root.
pub fn relative_path(path: &Path) -> Result<PathBuf> {
    let mut rel = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::Normal(part) => rel.push(part),
            Component::ParentDir => {
                return Err(BurrowError::MalformedInput {
                    input: path.display().to_string(),
                    message: "path escapes the container root".into(),
                });
            }
        }
    }
    Ok(rel)
}

/// Name of the whiteout entry hiding `name`.
pub fn whiteout_name(name: &OsStr) -> std::ffi::OsString {
    let mut out = std::ffi::OsString::from(WHITEOUT_PREFIX);
    out.push(name);
    out
}

/// Returns the hidden name if `name` is a whiteout entry (not the opaque marker).
pub fn whiteout_target(name: &OsStr) -> Option<&OsStr> {
    let text = name.to_str()?;
    if text == WHITEOUT_OPAQUE {
        return None;
    }
    text.strip_prefix(WHITEOUT_PREFIX).map(OsStr::new)
}

/// Whether `name` is the opaque directory marker.
pub fn is_opaque_marker(name: &OsStr) -> bool {
    name == WHITEOUT_OPAQUE
}

/// Whether anything (including a dangling symlink) exists at `path`.
pub(crate) fn present(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// Removes a file, symlink, or directory tree. Missing paths are not an error.
///
/// Directories are made owner-writable first, since extracted layers may
/// carry read-only directory modes.
///
/// # Errors
///
/// Returns an error if an existing entry cannot be removed.
pub fn remove_tree(path: &Path) -> Result<()> {
    let Ok(meta) = path.symlink_metadata() else {
        return Ok(());
    };
    if meta.is_dir() {
        make_owner_writable(path)?;
        fs::remove_dir_all(path).map_err(|e| BurrowError::io(path, e))
    } else {
        fs::remove_file(path).map_err(|e| BurrowError::io(path, e))
    }
}

fn make_owner_writable(dir: &Path) -> Result<()> {
    let meta = dir.symlink_metadata().map_err(|e| BurrowError::io(dir, e))?;
    let mut perms = meta.permissions();
    if perms.mode() & 0o700 != 0o700 {
        perms.set_mode(perms.mode() | 0o700);
        fs::set_permissions(dir, perms).map_err(|e| BurrowError::io(dir, e))?;
    }
    for entry in fs::read_dir(dir).map_err(|e| BurrowError::io(dir, e))? {
        let entry = entry.map_err(|e| BurrowError::io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| BurrowError::io(entry.path(), e))?;
        if file_type.is_dir() {
            make_owner_writable(&entry.path())?;
        }
    }
    Ok(())
}

/// Creates `dst` as a directory carrying `src_mode`, always owner-accessible.
pub(crate) fn create_dir_like(dst: &Path, src_mode: u32) -> Result<()> {
    if let Ok(meta) = dst.symlink_metadata() {
        if meta.is_dir() {
            return Ok(());
        }
        remove_tree(dst)?;
    }
    fs::create_dir_all(dst).map_err(|e| BurrowError::io(dst, e))?;
    let perms = fs::Permissions::from_mode((src_mode & 0o7777) | 0o700);
    fs::set_permissions(dst, perms).map_err(|e| BurrowError::io(dst, e))
}

/// Copies a single non-directory entry, replacing whatever is at `dst`.
///
/// Regular files keep their permission bits and symlinks keep their target.
/// Returns `false` for entry types that cannot be materialized without
/// privilege (devices, fifos, sockets), which are skipped.
pub(crate) fn copy_entry(src: &Path, dst: &Path) -> Result<bool> {
    let meta = src.symlink_metadata().map_err(|e| BurrowError::io(src, e))?;
    let file_type = meta.file_type();
    if !file_type.is_file() && !file_type.is_symlink() {
        tracing::debug!(path = %src.display(), "skipping special file");
        return Ok(false);
    }
    remove_tree(dst)?;
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| BurrowError::io(parent, e))?;
    }
    if file_type.is_symlink() {
        let target = fs::read_link(src).map_err(|e| BurrowError::io(src, e))?;
        std::os::unix::fs::symlink(&target, dst).map_err(|e| BurrowError::io(dst, e))?;
    } else {
        let _bytes = fs::copy(src, dst).map_err(|e| BurrowError::io(dst, e))?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_strips_root_and_dots() {
        let rel = relative_path(Path::new("/usr/./bin/env")).unwrap();
        assert_eq!(rel, PathBuf::from("usr/bin/env"));
    }

    #[test]
    fn relative_path_rejects_parent_components() {
        assert!(relative_path(Path::new("/usr/../../etc")).is_err());
    }

    #[test]
    fn whiteout_names_roundtrip() {
        let name = whiteout_name(OsStr::new("passwd"));
        assert_eq!(name, ".wh.passwd");
        assert_eq!(whiteout_target(&name), Some(OsStr::new("passwd")));
        assert_eq!(whiteout_target(OsStr::new(".wh..wh..opq")), None);
        assert!(is_opaque_marker(OsStr::new(".wh..wh..opq")));
    }

    #[test]
    fn remove_tree_handles_read_only_directories() {
        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir_all(locked.join("inner")).unwrap();
        fs::write(locked.join("inner/file"), b"x").unwrap();
        fs::set_permissions(locked.join("inner"), fs::Permissions::from_mode(0o555)).unwrap();

        remove_tree(&locked).unwrap();
        assert!(!locked.exists());
        remove_tree(&locked).unwrap();
    }

    #[test]
    fn copy_entry_preserves_symlink_target() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("link");
        std::os::unix::fs::symlink("/bin/busybox", &src).unwrap();
        let dst = dir.path().join("out/link");
        assert!(copy_entry(&src, &dst).unwrap());
        assert_eq!(fs::read_link(&dst).unwrap(), PathBuf::from("/bin/busybox"));
    }
}
