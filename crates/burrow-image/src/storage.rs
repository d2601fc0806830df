//! Content-addressed store of layer blobs and extracted layers.
//!
//! Layout under the store root:
//! - `blobs/<hex>`: verified compressed blobs, kept after extraction.
//! - `layers/<hex>`: extracted layer trees, shared by every image using
//!   the digest.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use burrow_common::error::{BurrowError, Result};
use burrow_common::types::Digest;
use burrow_core::filesystem::remove_tree;

use crate::hash;
use crate::layer::{self, Layer};

/// Manages local storage of blobs and layers.
#[derive(Debug, Clone)]
pub struct LayerStore {
    /// Root directory for all stored data.
    root: PathBuf,
}

impl LayerStore {
    /// Opens or initializes the store at the given root.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tracing::debug!(path = %root.display(), "opening layer store");
        for dir in [root.join("blobs"), root.join("layers")] {
            fs::create_dir_all(&dir).map_err(|e| BurrowError::io(&dir, e))?;
        }
        Ok(Self { root })
    }

    /// Returns the root storage path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a layer's extracted directory.
    #[must_use]
    pub fn layer_path(&self, digest: &Digest) -> PathBuf {
        self.root.join("layers").join(digest.as_hex())
    }

    /// Path of a layer's kept blob.
    #[must_use]
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root.join("blobs").join(digest.as_hex())
    }

    /// Whether the layer is extracted.
    #[must_use]
    pub fn has_layer(&self, digest: &Digest) -> bool {
        self.layer_path(digest).is_dir()
    }

    /// Whether the blob is kept.
    #[must_use]
    pub fn has_blob(&self, digest: &Digest) -> bool {
        self.blob_path(digest).is_file()
    }

    /// Streams a blob through `fill` into the store, verifying its digest.
    ///
    /// With `expected` set, the content must hash to it; otherwise the blob
    /// is stored under whatever digest it has. A blob already kept under the
    /// expected digest is not rewritten.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Integrity` on mismatch (the partial blob is
    /// deleted), or whatever `fill` returns.
    pub fn ingest_with<F>(&self, expected: Option<&Digest>, fill: F) -> Result<Layer>
    where
        F: FnOnce(&mut dyn Write) -> Result<()>,
    {
        if let Some(digest) = expected {
            if self.has_blob(digest) {
                let size_bytes = blob_size(&self.blob_path(digest))?;
                return Ok(Layer {
                    digest: digest.clone(),
                    size_bytes,
                });
            }
        }

        let partial = self
            .root
            .join("blobs")
            .join(format!(".partial-{}", uuid::Uuid::new_v4().simple()));
        let outcome = self.write_partial(&partial, fill).and_then(|()| {
            let file = File::open(&partial).map_err(|e| BurrowError::io(&partial, e))?;
            let (actual, size_bytes) =
                hash::hash_reader(file).map_err(|e| BurrowError::io(&partial, e))?;
            if let Some(expected) = expected {
                if &actual != expected {
                    return Err(BurrowError::Integrity {
                        resource: format!("blob {expected}"),
                        expected: expected.to_string(),
                        actual: actual.to_string(),
                    });
                }
            }
            let dest = self.blob_path(&actual);
            fs::rename(&partial, &dest).map_err(|e| BurrowError::io(&dest, e))?;
            Ok(Layer {
                digest: actual,
                size_bytes,
            })
        });
        if outcome.is_err() {
            let _ = fs::remove_file(&partial);
        }
        let layer = outcome?;
        tracing::info!(digest = %layer.digest, size = layer.size_bytes, "blob stored");
        Ok(layer)
    }

    /// Copies an existing file into the store as a blob.
    ///
    /// # Errors
    ///
    /// Same as [`LayerStore::ingest_with`].
    pub fn ingest_file(&self, source: &Path, expected: Option<&Digest>) -> Result<Layer> {
        self.ingest_with(expected, |out| {
            let mut file = File::open(source).map_err(|e| BurrowError::io(source, e))?;
            let _bytes = std::io::copy(&mut file, out).map_err(|e| BurrowError::io(source, e))?;
            Ok(())
        })
    }

    fn write_partial<F>(&self, partial: &Path, fill: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Write) -> Result<()>,
    {
        let file = File::create(partial).map_err(|e| BurrowError::io(partial, e))?;
        let mut writer = BufWriter::new(file);
        fill(&mut writer)?;
        writer.flush().map_err(|e| BurrowError::io(partial, e))?;
        Ok(())
    }

    /// Ensures the layer is extracted from its kept blob.
    ///
    /// An existing extraction is reused as is. Otherwise the blob digest is
    /// re-verified before extracting; a corrupted blob is deleted.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` if neither layer nor blob exists,
    /// `BurrowError::Integrity` if the blob is corrupted.
    pub fn ensure_extracted(&self, digest: &Digest) -> Result<PathBuf> {
        let target = self.layer_path(digest);
        if target.is_dir() {
            tracing::debug!(digest = %digest, "layer already extracted");
            return Ok(target);
        }
        let blob = self.blob_path(digest);
        if !blob.is_file() {
            return Err(BurrowError::NotFound {
                kind: "layer blob",
                id: digest.to_string(),
            });
        }
        if let Err(e) = hash::validate_hash(&blob, digest) {
            tracing::warn!(digest = %digest, "kept blob is corrupted, deleting it");
            let _ = fs::remove_file(&blob);
            return Err(e);
        }
        let _stats = layer::extract_layer(&blob, &target)?;
        Ok(target)
    }

    /// Deletes a layer's extracted directory. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be removed.
    pub fn remove_layer(&self, digest: &Digest) -> Result<bool> {
        let path = self.layer_path(digest);
        let existed = path.exists();
        remove_tree(&path)?;
        Ok(existed)
    }

    /// Deletes a kept blob. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    pub fn remove_blob(&self, digest: &Digest) -> Result<bool> {
        let path = self.blob_path(digest);
        let existed = path.exists();
        remove_tree(&path)?;
        Ok(existed)
    }

    /// Size of a kept blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob cannot be read.
    pub fn blob_size(&self, digest: &Digest) -> Result<u64> {
        blob_size(&self.blob_path(digest))
    }
}

fn blob_size(path: &Path) -> Result<u64> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| BurrowError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gz_layer(name: &str, contents: &str) -> Vec<u8> {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, contents.as_bytes())
            .expect("append");
        builder
            .into_inner()
            .expect("into_inner")
            .finish()
            .expect("finish")
    }

    #[test]
    fn storage_layer_path_includes_hex() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LayerStore::open(dir.path()).expect("open");
        let digest = hash::hash_bytes(b"x");
        assert!(store.layer_path(&digest).ends_with(format!("layers/{}", digest.as_hex())));
        assert!(!store.has_layer(&digest));
    }

    #[test]
    fn ingest_and_extract_is_deduplicated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LayerStore::open(dir.path()).expect("open");
        let blob = gz_layer("bin/sh", "#!");
        let digest = hash::hash_bytes(&blob);

        let layer = store
            .ingest_with(Some(&digest), |out| {
                out.write_all(&blob).map_err(|e| BurrowError::io("blob", e))
            })
            .expect("ingest");
        assert_eq!(layer.digest, digest);
        let first = store.ensure_extracted(&digest).expect("extract");

        let mut called = false;
        let _ = store
            .ingest_with(Some(&digest), |_| {
                called = true;
                Ok(())
            })
            .expect("second ingest");
        assert!(!called);
        let second = store.ensure_extracted(&digest).expect("extract again");
        assert_eq!(first, second);
        assert_eq!(fs::read_dir(dir.path().join("layers")).expect("read").count(), 1);
    }

    #[test]
    fn integrity_mismatch_leaves_nothing_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LayerStore::open(dir.path()).expect("open");
        let expected = hash::hash_bytes(b"the real layer");
        let err = store
            .ingest_with(Some(&expected), |out| {
                out.write_all(b"tampered").map_err(|e| BurrowError::io("blob", e))
            })
            .unwrap_err();
        assert_eq!(err.kind(), "integrity");
        assert!(!store.has_blob(&expected));
        assert!(!store.has_layer(&expected));
        assert_eq!(fs::read_dir(dir.path().join("blobs")).expect("read").count(), 0);
    }

    #[test]
    fn corrupted_kept_blob_is_rejected_and_deleted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LayerStore::open(dir.path()).expect("open");
        let blob = gz_layer("etc/motd", "hi");
        let digest = hash::hash_bytes(&blob);
        fs::write(store.blob_path(&digest), b"bit rot").expect("write");

        let err = store.ensure_extracted(&digest).unwrap_err();
        assert_eq!(err.kind(), "integrity");
        assert!(!store.has_blob(&digest));
        assert!(!store.has_layer(&digest));
    }

    #[test]
    fn missing_blob_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LayerStore::open(dir.path()).expect("open");
        let err = store.ensure_extracted(&hash::hash_bytes(b"nope")).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
