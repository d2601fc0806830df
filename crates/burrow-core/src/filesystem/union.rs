//! Emulated union filesystem view.
//!
//! A view is an ordered list of read-only layer roots (bottom to top) plus
//! one writable root that always sits on top. Lookup walks the layers from
//! the highest down: the first layer holding the path wins, and a whiteout
//! for the path (or one of its ancestors), or an opaque marker in an
//! ancestor directory, ends the lookup in the layer that carries it.
//!
//! Paths are walked one component at a time without following symlinks:
//! a symlink or other non-directory in the middle of a path hides the
//! deeper path in that layer and every layer below it.

use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};

use burrow_common::constants::WHITEOUT_OPAQUE;
use burrow_common::error::{BurrowError, Result};

use super::{present, relative_path, whiteout_name};

/// Outcome of looking a path up in a single layer.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LayerLookup {
    /// The layer holds the path.
    Found(PathBuf),
    /// The layer hides the path from every layer below it.
    Hidden,
    /// The layer says nothing about the path.
    Absent,
}

/// Ordered read-only layers with a writable layer on top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnionView {
    lowers: Vec<PathBuf>,
    upper: PathBuf,
}

impl UnionView {
    /// Creates a view from read-only layers (bottom to top) and a writable root.
    #[must_use]
    pub const fn new(lowers: Vec<PathBuf>, upper: PathBuf) -> Self {
        Self { lowers, upper }
    }

    /// Read-only layer roots, bottom to top.
    #[must_use]
    pub fn lowers(&self) -> &[PathBuf] {
        &self.lowers
    }

    /// The writable layer root.
    #[must_use]
    pub fn upper(&self) -> &Path {
        &self.upper
    }

    /// Every layer root from the highest (writable) to the lowest.
    pub fn layers_top_down(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.upper.as_path()).chain(self.lowers.iter().rev().map(PathBuf::as_path))
    }

    /// Resolves a container path to the host path that answers for it.
    ///
    /// Returns `None` when no layer holds the path or a whiteout hides it.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::MalformedInput` if the path escapes the root.
    pub fn resolve(&self, path: &Path) -> Result<Option<PathBuf>> {
        let rel = relative_path(path)?;
        Ok(lookup(self.layers_top_down(), &rel))
    }

    /// Resolves a container path against the read-only layers only.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::MalformedInput` if the path escapes the root.
    pub fn resolve_lower(&self, path: &Path) -> Result<Option<PathBuf>> {
        let rel = relative_path(path)?;
        Ok(lookup(self.lowers.iter().rev().map(PathBuf::as_path), &rel))
    }

    /// Names visible in a directory of the read-only stack.
    ///
    /// # Errors
    ///
    /// Returns an error if a layer directory exists but cannot be read.
    pub fn list_lower(&self, dir: &Path) -> Result<BTreeSet<OsString>> {
        let rel = relative_path(dir)?;
        let mut candidates = BTreeSet::new();
        for layer in self.lowers.iter().rev() {
            let Some(layer_dir) = directory_in_layer(layer, &rel) else {
                continue;
            };
            for entry in fs::read_dir(&layer_dir).map_err(|e| BurrowError::io(&layer_dir, e))? {
                let entry = entry.map_err(|e| BurrowError::io(&layer_dir, e))?;
                let name = entry.file_name();
                if super::whiteout_target(&name).is_none() && !super::is_opaque_marker(&name) {
                    let _ = candidates.insert(name);
                }
            }
            if present(&layer_dir.join(WHITEOUT_OPAQUE)) {
                break;
            }
        }
        let mut visible = BTreeSet::new();
        for name in candidates {
            let child = rel.join(&name);
            if lookup(self.lowers.iter().rev().map(PathBuf::as_path), &child).is_some() {
                let _ = visible.insert(name);
            }
        }
        Ok(visible)
    }
}

/// Walks `layers` (highest first) and returns the host path answering `rel`.
fn lookup<'a>(layers: impl Iterator<Item = &'a Path>, rel: &Path) -> Option<PathBuf> {
    let components: Vec<&OsStr> = rel.iter().collect();
    for layer in layers {
        match lookup_in_layer(layer, &components) {
            LayerLookup::Found(path) => return Some(path),
            LayerLookup::Hidden => return None,
            LayerLookup::Absent => {}
        }
    }
    None
}

fn lookup_in_layer(layer: &Path, components: &[&OsStr]) -> LayerLookup {
    let mut dir = layer.to_path_buf();
    for (depth, name) in components.iter().enumerate() {
        let next = dir.join(name);
        match next.symlink_metadata() {
            Ok(_) if depth + 1 == components.len() => return LayerLookup::Found(next),
            Ok(meta) if meta.is_dir() => dir = next,
            Ok(_) => return LayerLookup::Hidden,
            Err(_) => {
                let hidden = present(&dir.join(whiteout_name(name)))
                    || present(&dir.join(WHITEOUT_OPAQUE));
                return if hidden {
                    LayerLookup::Hidden
                } else {
                    LayerLookup::Absent
                };
            }
        }
    }
    if present(&dir) {
        LayerLookup::Found(dir)
    } else {
        LayerLookup::Absent
    }
}

/// The layer's own directory at `rel`, if every component is a real
/// directory inside the layer.
fn directory_in_layer(layer: &Path, rel: &Path) -> Option<PathBuf> {
    if !layer.is_dir() {
        return None;
    }
    let mut dir = layer.to_path_buf();
    for name in rel {
        dir.push(name);
        if !dir.symlink_metadata().is_ok_and(|m| m.is_dir()) {
            return None;
        }
    }
    Some(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn three_layers(root: &Path) -> UnionView {
        let l0 = root.join("l0");
        let l1 = root.join("l1");
        let l2 = root.join("l2");
        let rw = root.join("rw");
        write(&l0.join("etc/hostname"), "base");
        write(&l1.join("p"), "from l1");
        write(&l2.join("p"), "from l2");
        fs::create_dir_all(&rw).unwrap();
        UnionView::new(vec![l0, l1, l2], rw)
    }

    #[test]
    fn higher_layer_shadows_lower() {
        let dir = tempfile::tempdir().unwrap();
        let view = three_layers(dir.path());
        let resolved = view.resolve(Path::new("/p")).unwrap().unwrap();
        assert_eq!(fs::read_to_string(resolved).unwrap(), "from l2");

        let without_top = UnionView::new(view.lowers()[..2].to_vec(), view.upper().to_path_buf());
        let resolved = without_top.resolve(Path::new("/p")).unwrap().unwrap();
        assert_eq!(fs::read_to_string(resolved).unwrap(), "from l1");
    }

    #[test]
    fn writable_layer_is_always_highest() {
        let dir = tempfile::tempdir().unwrap();
        let view = three_layers(dir.path());
        write(&view.upper().join("p"), "edited");
        let resolved = view.resolve(Path::new("p")).unwrap().unwrap();
        assert_eq!(fs::read_to_string(resolved).unwrap(), "edited");
        let lower = view.resolve_lower(Path::new("p")).unwrap().unwrap();
        assert_eq!(fs::read_to_string(lower).unwrap(), "from l2");
    }

    #[test]
    fn whiteout_hides_lower_file() {
        let dir = tempfile::tempdir().unwrap();
        let view = three_layers(dir.path());
        write(&view.upper().join("etc/.wh.hostname"), "");
        assert!(view.resolve(Path::new("/etc/hostname")).unwrap().is_none());
        assert!(view.resolve_lower(Path::new("/etc/hostname")).unwrap().is_some());
    }

    #[test]
    fn ancestor_whiteout_hides_subtree() {
        let dir = tempfile::tempdir().unwrap();
        let view = three_layers(dir.path());
        write(&view.lowers()[2].join(".wh.etc"), "");
        assert!(view.resolve(Path::new("/etc/hostname")).unwrap().is_none());
    }

    #[test]
    fn opaque_directory_hides_lower_children_only() {
        let dir = tempfile::tempdir().unwrap();
        let view = three_layers(dir.path());
        write(&view.upper().join("etc/.wh..wh..opq"), "");
        write(&view.upper().join("etc/motd"), "hi");
        assert!(view.resolve(Path::new("/etc/hostname")).unwrap().is_none());
        assert!(view.resolve(Path::new("/etc/motd")).unwrap().is_some());
        assert!(view.resolve(Path::new("/etc")).unwrap().is_some());
    }

    #[test]
    fn list_lower_merges_layers_and_honors_whiteouts() {
        let dir = tempfile::tempdir().unwrap();
        let view = three_layers(dir.path());
        write(&view.lowers()[1].join("etc/issue"), "l1");
        write(&view.lowers()[2].join("etc/.wh.hostname"), "");
        let names = view.list_lower(Path::new("/etc")).unwrap();
        let names: Vec<_> = names.iter().map(|n| n.to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["issue"]);
    }

    #[test]
    fn symlinked_directory_in_layer_is_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let view = three_layers(dir.path());
        let outside = dir.path().join("outside");
        write(&outside.join("secret"), "host");
        fs::create_dir_all(view.lowers()[0].join("var")).unwrap();
        std::os::unix::fs::symlink(&outside, view.lowers()[0].join("var/run")).unwrap();

        assert!(view.resolve(Path::new("/var/run/secret")).unwrap().is_none());
        assert!(view.list_lower(Path::new("/var/run")).unwrap().is_empty());
        let link = view.resolve(Path::new("/var/run")).unwrap().unwrap();
        assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
    }

    #[test]
    fn file_in_higher_layer_hides_lower_subtree() {
        let dir = tempfile::tempdir().unwrap();
        let view = three_layers(dir.path());
        write(&view.lowers()[2].join("etc"), "not a directory");
        assert!(view.resolve(Path::new("/etc/hostname")).unwrap().is_none());
    }

    #[test]
    fn missing_path_resolves_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let view = three_layers(dir.path());
        assert!(view.resolve(Path::new("/nope")).unwrap().is_none());
    }
}
