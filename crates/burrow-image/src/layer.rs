//! Filesystem layer archives.
//!
//! Layers travel as gzip tar blobs. Extraction unpacks into a scratch
//! directory next to the target and renames it into place, so a layer
//! directory either holds a complete extraction or does not exist.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path};

use burrow_common::error::{BurrowError, Result};
use burrow_common::types::Digest;
use burrow_core::filesystem::remove_tree;

/// A single filesystem layer of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    /// Digest of the compressed blob.
    pub digest: Digest,
    /// Size of the compressed blob in bytes.
    pub size_bytes: u64,
}

/// Counters reported by [`extract_layer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    /// Entries written to disk.
    pub unpacked: usize,
    /// Device nodes, fifos, and unsafe paths that were left out.
    pub skipped: usize,
}

/// Extracts a tar archive into `target`, which must not exist yet.
///
/// Supports both plain `.tar` and gzip-compressed archives (detected by
/// magic bytes). Entries an unprivileged user cannot create are skipped.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or the target written.
/// No partial `target` is left behind.
pub fn extract_layer(archive_path: &Path, target: &Path) -> Result<ExtractStats> {
    tracing::info!(
        archive = %archive_path.display(),
        target = %target.display(),
        "extracting layer"
    );

    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| BurrowError::io(parent, e))?;
    let scratch = parent.join(format!(".extract-{}", uuid::Uuid::new_v4().simple()));
    fs::create_dir_all(&scratch).map_err(|e| BurrowError::io(&scratch, e))?;

    let result = unpack_into(archive_path, &scratch).and_then(|stats| {
        fs::rename(&scratch, target).map_err(|e| BurrowError::io(target, e))?;
        Ok(stats)
    });
    if result.is_err() {
        let _ = remove_tree(&scratch);
    }
    let stats = result?;
    tracing::info!(unpacked = stats.unpacked, skipped = stats.skipped, "layer extracted");
    Ok(stats)
}

fn unpack_into(archive_path: &Path, dir: &Path) -> Result<ExtractStats> {
    let io_err = |e| BurrowError::io(archive_path, e);
    let reader: Box<dyn Read> = if is_gzip_archive(archive_path)? {
        Box::new(flate2::read::GzDecoder::new(
            File::open(archive_path).map_err(io_err)?,
        ))
    } else {
        Box::new(File::open(archive_path).map_err(io_err)?)
    };

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_unpack_xattrs(false);
    archive.set_overwrite(true);

    let mut stats = ExtractStats::default();
    for entry in archive.entries().map_err(io_err)? {
        let mut entry = entry.map_err(io_err)?;
        let kind = entry.header().entry_type();
        let path = entry.path().map_err(io_err)?.into_owned();
        let unsafe_path = path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir));
        if unsafe_path
            || kind.is_block_special()
            || kind.is_character_special()
            || kind.is_fifo()
        {
            tracing::debug!(path = %path.display(), "skipping layer entry");
            stats.skipped += 1;
            continue;
        }
        if entry.unpack_in(dir).map_err(|e| BurrowError::io(dir.join(&path), e))? {
            stats.unpacked += 1;
        } else {
            stats.skipped += 1;
        }
    }
    Ok(stats)
}

/// Packs `dir` into a gzip tar stream written to `out`.
///
/// Symlinks are stored as links. Entries are added in sorted order so the
/// same tree packs to the same bytes apart from timestamps.
///
/// # Errors
///
/// Returns an error if the tree cannot be read or the stream written.
pub fn pack_layer<W: Write>(dir: &Path, out: W) -> Result<()> {
    tracing::info!(source = %dir.display(), "packing layer");
    let encoder = flate2::write::GzEncoder::new(out, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    append_tree(&mut builder, dir, Path::new(""))?;
    let encoder = builder.into_inner().map_err(|e| BurrowError::io(dir, e))?;
    let _out = encoder.finish().map_err(|e| BurrowError::io(dir, e))?;
    Ok(())
}

fn append_tree<W: Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    rel: &Path,
) -> Result<()> {
    let dir = root.join(rel);
    let mut names: Vec<_> = fs::read_dir(&dir)
        .map_err(|e| BurrowError::io(&dir, e))?
        .filter_map(std::result::Result::ok)
        .map(|e| e.file_name())
        .collect();
    names.sort();
    for name in names {
        let child_rel = rel.join(&name);
        let child = root.join(&child_rel);
        let meta = child
            .symlink_metadata()
            .map_err(|e| BurrowError::io(&child, e))?;
        builder
            .append_path_with_name(&child, &child_rel)
            .map_err(|e| BurrowError::io(&child, e))?;
        if meta.is_dir() {
            append_tree(builder, root, &child_rel)?;
        }
    }
    Ok(())
}

/// Whether the archive starts with the gzip magic bytes.
fn is_gzip_archive(path: &Path) -> Result<bool> {
    let mut magic = [0_u8; 2];
    let mut file = File::open(path).map_err(|e| BurrowError::io(path, e))?;
    let n = file.read(&mut magic).map_err(|e| BurrowError::io(path, e))?;
    Ok(n == 2 && magic == [0x1f, 0x8b])
}
