//! Capture of an assembled root's changes as a writable layer.
//!
//! Compares the assembled root against the read-only stack beneath it and
//! rewrites the writable layer so that it holds exactly the difference:
//! added and modified entries are copied in, and every lower-stack path
//! missing from the root gets a whiteout sentinel.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use burrow_common::error::{BurrowError, Result};

use super::union::UnionView;
use super::{copy_entry, create_dir_like, remove_tree, whiteout_name};

/// Counters describing a captured diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Entries present in the root but not in the read-only stack.
    pub added: usize,
    /// Entries whose content, mode, or type differs from the stack.
    pub modified: usize,
    /// Stack entries deleted from the root (recorded as whiteouts).
    pub deleted: usize,
}

impl DiffSummary {
    /// Whether the root matches the read-only stack exactly.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.added == 0 && self.modified == 0 && self.deleted == 0
    }
}

/// Rewrites `view.upper()` with the difference between `root` and the
/// read-only layers of `view`.
///
/// # Errors
///
/// Returns an error if the root or a layer cannot be read, or the writable
/// layer cannot be rewritten.
pub fn capture(view: &UnionView, root: &Path) -> Result<DiffSummary> {
    let upper = view.upper();
    remove_tree(upper)?;
    fs::create_dir_all(upper).map_err(|e| BurrowError::io(upper, e))?;

    let mut summary = DiffSummary::default();
    diff_dir(view, root, Path::new(""), &mut summary)?;
    tracing::info!(
        root = %root.display(),
        added = summary.added,
        modified = summary.modified,
        deleted = summary.deleted,
        "captured writable layer"
    );
    Ok(summary)
}

fn diff_dir(view: &UnionView, root: &Path, rel: &Path, summary: &mut DiffSummary) -> Result<()> {
    let dir = root.join(rel);
    let mut present = BTreeSet::<OsString>::new();

    for entry in fs::read_dir(&dir).map_err(|e| BurrowError::io(&dir, e))? {
        let entry = entry.map_err(|e| BurrowError::io(&dir, e))?;
        let name = entry.file_name();
        let child_rel = rel.join(&name);
        let _ = present.insert(name);

        let ours = entry.path();
        let meta = ours.symlink_metadata().map_err(|e| BurrowError::io(&ours, e))?;
        let lower = view.resolve_lower(&child_rel)?;

        if meta.is_dir() {
            let lower_is_dir = lower
                .as_ref()
                .is_some_and(|p| p.symlink_metadata().is_ok_and(|m| m.is_dir()));
            if !lower_is_dir {
                create_dir_like(&view.upper().join(&child_rel), meta.permissions().mode())?;
                if lower.is_some() {
                    summary.modified += 1;
                } else {
                    summary.added += 1;
                }
            }
            diff_dir(view, root, &child_rel, summary)?;
            continue;
        }

        let changed = match &lower {
            None => {
                summary.added += 1;
                true
            }
            Some(lower_path) => {
                let differs = entry_differs(&ours, lower_path)?;
                if differs {
                    summary.modified += 1;
                }
                differs
            }
        };
        if changed {
            let _copied = copy_entry(&ours, &view.upper().join(&child_rel))?;
        }
    }

    for name in view.list_lower(rel)? {
        if present.contains(&name) {
            continue;
        }
        let sentinel_dir = view.upper().join(rel);
        fs::create_dir_all(&sentinel_dir).map_err(|e| BurrowError::io(&sentinel_dir, e))?;
        let sentinel = sentinel_dir.join(whiteout_name(&name));
        let _file = File::create(&sentinel).map_err(|e| BurrowError::io(&sentinel, e))?;
        summary.deleted += 1;
    }
    Ok(())
}

/// Whether two non-directory entries differ in type, mode, target, or content.
fn entry_differs(ours: &Path, theirs: &Path) -> Result<bool> {
    let a = ours.symlink_metadata().map_err(|e| BurrowError::io(ours, e))?;
    let b = theirs.symlink_metadata().map_err(|e| BurrowError::io(theirs, e))?;
    if a.file_type().is_symlink() || b.file_type().is_symlink() {
        if !(a.file_type().is_symlink() && b.file_type().is_symlink()) {
            return Ok(true);
        }
        let ta = fs::read_link(ours).map_err(|e| BurrowError::io(ours, e))?;
        let tb = fs::read_link(theirs).map_err(|e| BurrowError::io(theirs, e))?;
        return Ok(ta != tb);
    }
    if !b.is_file() || a.len() != b.len() {
        return Ok(true);
    }
    if a.permissions().mode() & 0o7777 != b.permissions().mode() & 0o7777 {
        return Ok(true);
    }
    same_contents(ours, theirs)
        .map(|same| !same)
        .map_err(|e| BurrowError::io(ours, e))
}

fn same_contents(a: &Path, b: &Path) -> io::Result<bool> {
    let mut fa = File::open(a)?;
    let mut fb = File::open(b)?;
    let mut buf_a = vec![0_u8; 64 * 1024];
    let mut buf_b = vec![0_u8; 64 * 1024];
    loop {
        let n = fa.read(&mut buf_a)?;
        if n == 0 {
            return Ok(fb.read(&mut buf_b[..1])? == 0);
        }
        fb.read_exact(&mut buf_b[..n])?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}
