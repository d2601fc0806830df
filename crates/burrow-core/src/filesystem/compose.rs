//! Copy-composition of an assembled container root.
//!
//! Materializes a [`UnionView`] into a plain directory by applying each
//! layer bottom to top: opaque markers clear what lower layers put in their
//! directory, whiteouts delete the named entry, and everything else is
//! copied over what is already there.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use burrow_common::error::{BurrowError, Result};

use super::union::UnionView;
use super::{copy_entry, create_dir_like, is_opaque_marker, remove_tree, whiteout_target};

/// Counters reported after assembling a root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssembleStats {
    /// Files and symlinks copied into the root.
    pub copied: usize,
    /// Entries removed by whiteouts or opaque markers.
    pub hidden: usize,
    /// Special files skipped.
    pub skipped: usize,
}

/// Assembles `view` into `target`, replacing any previous content.
///
/// # Errors
///
/// Returns an error if a layer cannot be read or the target cannot be written.
pub fn assemble(view: &UnionView, target: &Path) -> Result<AssembleStats> {
    tracing::info!(
        target = %target.display(),
        layers = view.lowers().len(),
        "assembling container root"
    );
    remove_tree(target)?;
    fs::create_dir_all(target).map_err(|e| BurrowError::io(target, e))?;

    let mut stats = AssembleStats::default();
    let upper = view.upper().to_path_buf();
    for layer in view.lowers().iter().chain(std::iter::once(&upper)) {
        if layer.is_dir() {
            apply_layer(layer, target, &mut stats)?;
        }
    }
    tracing::debug!(?stats, "container root assembled");
    Ok(stats)
}

fn apply_layer(src: &Path, dst: &Path, stats: &mut AssembleStats) -> Result<()> {
    let mut entries = Vec::new();
    let mut opaque = false;
    for entry in fs::read_dir(src).map_err(|e| BurrowError::io(src, e))? {
        let entry = entry.map_err(|e| BurrowError::io(src, e))?;
        if is_opaque_marker(&entry.file_name()) {
            opaque = true;
        } else {
            entries.push(entry);
        }
    }

    if opaque {
        for existing in fs::read_dir(dst).map_err(|e| BurrowError::io(dst, e))? {
            let existing = existing.map_err(|e| BurrowError::io(dst, e))?;
            remove_tree(&existing.path())?;
            stats.hidden += 1;
        }
    }

    for entry in &entries {
        let name = entry.file_name();
        if let Some(hidden) = whiteout_target(&name) {
            let victim = dst.join(hidden);
            if super::present(&victim) {
                remove_tree(&victim)?;
                stats.hidden += 1;
            }
        }
    }

    for entry in entries {
        let name = entry.file_name();
        if whiteout_target(&name).is_some() {
            continue;
        }
        let src_path = entry.path();
        let dst_path = dst.join(&name);
        let meta = src_path
            .symlink_metadata()
            .map_err(|e| BurrowError::io(&src_path, e))?;
        if meta.is_dir() {
            create_dir_like(&dst_path, meta.permissions().mode())?;
            apply_layer(&src_path, &dst_path, stats)?;
        } else if copy_entry(&src_path, &dst_path)? {
            stats.copied += 1;
        } else {
            stats.skipped += 1;
        }
    }
    Ok(())
}
