//! Image client.
//!
//! Ties the layer store and the catalog to a [`RegistryTransport`]:
//! download, search, offline packages, reset, delete, commit, and push.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use burrow_common::config::BurrowConfig;
use burrow_common::constants::MAX_IMAGE_LAYERS;
use burrow_common::error::{BurrowError, Result};
use burrow_common::types::Digest;

use crate::catalog::{ImageCatalog, ImageEntry, ImageMetadata, LayerRef, chain_layers};
use crate::hash::{hash_bytes, hash_reader};
use crate::layer::pack_layer;
use crate::manifest::{Descriptor, ImageConfig, ImageManifest, MEDIA_TYPE_CONFIG, MEDIA_TYPE_LAYER};
use crate::reference::ImageRef;
use crate::remote::RegistryTransport;
use crate::stack::order_layers;
use crate::storage::LayerStore;

/// Name of the index file inside a package.
const PACKAGE_MANIFEST: &str = "manifest.json";

/// Directory of blobs inside a package.
const PACKAGE_BLOBS: &str = "blobs";

/// Index of an offline image package.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PackageManifest {
    name: String,
    tag: String,
    layers: Vec<LayerRef>,
    #[serde(default)]
    metadata: ImageMetadata,
}

/// An image with its layers ordered and extracted.
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    /// Catalog entry of the image.
    pub entry: ImageEntry,
    /// Layer digests, bottom to top.
    pub layers: Vec<Digest>,
    /// Extracted layer directories, bottom to top.
    pub paths: Vec<PathBuf>,
}

/// Local image store plus registry operations.
#[derive(Debug)]
pub struct ImageClient {
    store: LayerStore,
    catalog: ImageCatalog,
    package_dir: PathBuf,
}

impl ImageClient {
    /// Opens the image store of a data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directories cannot be created.
    pub fn open(config: &BurrowConfig) -> Result<Self> {
        Self::with_dirs(config.store_dir(), config.package_dir())
    }

    /// Opens an image store rooted at `root`, writing packages to `package_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directories cannot be created.
    pub fn with_dirs(root: &Path, package_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            store: LayerStore::open(root)?,
            catalog: ImageCatalog::open(root)?,
            package_dir: package_dir.into(),
        })
    }

    /// The layer store.
    #[must_use]
    pub const fn store(&self) -> &LayerStore {
        &self.store
    }

    /// Lists every image in the catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    pub fn list(&self) -> Result<Vec<ImageEntry>> {
        self.catalog.list()
    }

    /// Looks up one image.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` for an unknown image.
    pub fn get(&self, name: &str, tag: &str) -> Result<ImageEntry> {
        self.catalog.get(name, tag)
    }

    /// Downloads an image, fetching only blobs the store does not keep.
    ///
    /// Every blob is verified against its digest before it is kept or
    /// extracted.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Integrity` on a digest mismatch,
    /// `BurrowError::CorruptImage` for an unusable manifest, or any
    /// transport error.
    pub fn download(&self, transport: &dyn RegistryTransport, image: &ImageRef) -> Result<ImageEntry> {
        tracing::info!(image = %image, "downloading image");
        let manifest = transport.manifest(image)?;
        if manifest.layers.len() > MAX_IMAGE_LAYERS {
            return Err(BurrowError::CorruptImage {
                image: image.to_string(),
                message: format!(
                    "{} layers exceeds the limit of {MAX_IMAGE_LAYERS}",
                    manifest.layers.len()
                ),
            });
        }

        let metadata = self.fetch_metadata(transport, image, &manifest.config)?;

        let mut seen = HashSet::new();
        let mut layers = Vec::with_capacity(manifest.layers.len());
        for descriptor in &manifest.layers {
            let digest = Digest::parse(&descriptor.digest)?;
            if !seen.insert(digest.clone()) {
                tracing::debug!(digest = %digest, "layer repeated in manifest, skipping");
                continue;
            }
            if self.store.has_layer(&digest) || self.store.has_blob(&digest) {
                tracing::info!(digest = %digest, "layer already kept");
            } else {
                let _layer = self.fetch_into_store(transport, image, &digest)?;
            }
            let _path = self.store.ensure_extracted(&digest)?;
            layers.push((digest, descriptor.size));
        }

        let entry = ImageEntry {
            name: image.catalog_name(),
            tag: image.tag.clone(),
            layers: chain_layers(&layers),
            metadata,
            source: format!("registry {}", image.full_name()),
            created_at: Utc::now(),
        };
        self.catalog.register(entry.clone())?;
        tracing::info!(image = %entry.reference(), layers = entry.layers.len(), "image downloaded");
        Ok(entry)
    }

    fn fetch_metadata(
        &self,
        transport: &dyn RegistryTransport,
        image: &ImageRef,
        config: &Descriptor,
    ) -> Result<ImageMetadata> {
        let digest = Digest::parse(&config.digest)?;
        let mut body = Vec::new();
        let _bytes = transport.fetch_blob(image, &digest, &mut body)?;
        let actual = hash_bytes(&body);
        if actual != digest {
            return Err(BurrowError::Integrity {
                resource: format!("config {digest}"),
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }
        let config: ImageConfig = serde_json::from_slice(&body)?;
        Ok(config.metadata())
    }

    fn fetch_into_store(
        &self,
        transport: &dyn RegistryTransport,
        image: &ImageRef,
        digest: &Digest,
    ) -> Result<()> {
        tracing::info!(image = %image, digest = %digest, "fetching layer");
        let _layer = self.store.ingest_with(Some(digest), |out| {
            let _bytes = transport.fetch_blob(image, digest, out)?;
            Ok(())
        })?;
        Ok(())
    }

    /// Lists the tags of a remote repository.
    ///
    /// # Errors
    ///
    /// Returns any transport error.
    pub fn search(&self, transport: &dyn RegistryTransport, image: &ImageRef) -> Result<Vec<String>> {
        let mut tags = transport.tags(image)?;
        tags.sort();
        Ok(tags)
    }

    /// Orders and extracts an image's layers.
    ///
    /// Extracted layers are used as is, a missing extraction is redone from
    /// the kept blob, and only a layer with no kept blob is fetched through
    /// `transport`.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` for an unknown image or a missing
    /// layer with no transport, `BurrowError::CorruptImage` for broken
    /// parent links, or `BurrowError::Integrity` for a corrupted blob.
    pub fn resolve_layer_stack(
        &self,
        name: &str,
        tag: &str,
        transport: Option<&dyn RegistryTransport>,
    ) -> Result<ResolvedImage> {
        let entry = self.catalog.get(name, tag)?;
        let layers = order_layers(&entry)?;
        let mut paths = Vec::with_capacity(layers.len());
        for digest in &layers {
            if !self.store.has_layer(digest) && !self.store.has_blob(digest) {
                let Some(transport) = transport else {
                    return Err(BurrowError::NotFound {
                        kind: "layer",
                        id: digest.to_string(),
                    });
                };
                let image = ImageRef::from_parts(&entry.name, &entry.tag)?;
                self.fetch_into_store(transport, &image, digest)?;
            }
            paths.push(self.store.ensure_extracted(digest)?);
        }
        tracing::debug!(image = %entry.reference(), layers = layers.len(), "layer stack resolved");
        Ok(ResolvedImage {
            entry,
            layers,
            paths,
        })
    }

    /// Writes an offline package `<name>_<tag>.tar.gz` holding the image
    /// index and its blobs, downloading the image first if needed.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` if the image is not local and no
    /// transport is given, or an I/O error writing the package.
    pub fn package(&self, transport: Option<&dyn RegistryTransport>, image: &ImageRef) -> Result<PathBuf> {
        let name = image.catalog_name();
        let entry = match self.catalog.get(&name, &image.tag) {
            Ok(entry) => entry,
            Err(BurrowError::NotFound { kind, id }) => match transport {
                Some(transport) => self.download(transport, image)?,
                None => return Err(BurrowError::NotFound { kind, id }),
            },
            Err(e) => return Err(e),
        };

        for layer in &entry.layers {
            if !self.store.has_blob(&layer.digest) {
                let Some(transport) = transport else {
                    return Err(BurrowError::NotFound {
                        kind: "layer blob",
                        id: layer.digest.to_string(),
                    });
                };
                self.fetch_into_store(transport, image, &layer.digest)?;
            }
        }

        fs::create_dir_all(&self.package_dir).map_err(|e| BurrowError::io(&self.package_dir, e))?;
        let file_name = format!("{}_{}.tar.gz", name.replace(['/', ':'], "_"), entry.tag);
        let path = self.package_dir.join(file_name);
        let partial = self.package_dir.join(format!(
            ".package-{}.partial",
            uuid::Uuid::new_v4().simple()
        ));
        let outcome = self
            .write_package(&entry, &partial)
            .and_then(|()| fs::rename(&partial, &path).map_err(|e| BurrowError::io(&path, e)));
        if outcome.is_err() {
            let _ = fs::remove_file(&partial);
        }
        outcome?;
        tracing::info!(image = %entry.reference(), package = %path.display(), "image packaged");
        Ok(path)
    }

    fn write_package(&self, entry: &ImageEntry, out: &Path) -> Result<()> {
        let io_err = |e| BurrowError::io(out, e);
        let index = PackageManifest {
            name: entry.name.clone(),
            tag: entry.tag.clone(),
            layers: entry.layers.clone(),
            metadata: entry.metadata.clone(),
        };
        let index = serde_json::to_vec_pretty(&index)?;

        let file = File::create(out).map_err(io_err)?;
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let mut header = tar::Header::new_gnu();
        header.set_size(index.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, PACKAGE_MANIFEST, index.as_slice())
            .map_err(io_err)?;

        for layer in &entry.layers {
            let blob = self.store.blob_path(&layer.digest);
            builder
                .append_path_with_name(&blob, format!("{PACKAGE_BLOBS}/{}", layer.digest.as_hex()))
                .map_err(|e| BurrowError::io(&blob, e))?;
        }

        let encoder = builder.into_inner().map_err(io_err)?;
        let _file = encoder.finish().map_err(io_err)?;
        Ok(())
    }

    /// Ingests an offline package, verifying every blob, and registers the
    /// image it describes.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Integrity` for a blob that does not match its
    /// name, `BurrowError::CorruptImage` for a package without an index or
    /// missing a blob, or an I/O error reading the package.
    pub fn add(&self, tarball: &Path) -> Result<ImageEntry> {
        tracing::info!(package = %tarball.display(), "adding image package");
        let io_err = |e| BurrowError::io(tarball, e);
        let file = File::open(tarball).map_err(io_err)?;
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));

        let mut index: Option<PackageManifest> = None;
        let mut ingested = HashSet::new();
        for entry in archive.entries().map_err(io_err)? {
            let mut entry = entry.map_err(io_err)?;
            let path = entry.path().map_err(io_err)?.into_owned();
            if path == Path::new(PACKAGE_MANIFEST) {
                let mut raw = Vec::new();
                let _bytes = entry.read_to_end(&mut raw).map_err(io_err)?;
                index = Some(serde_json::from_slice(&raw)?);
            } else if let Ok(rel) = path.strip_prefix(PACKAGE_BLOBS) {
                let digest = Digest::parse(&rel.to_string_lossy())?;
                let _layer = self.store.ingest_with(Some(&digest), |out| {
                    let _bytes = std::io::copy(&mut entry, out).map_err(io_err)?;
                    Ok(())
                })?;
                let _ = ingested.insert(digest);
            } else {
                tracing::debug!(path = %path.display(), "ignoring package entry");
            }
        }

        let index = index.ok_or_else(|| BurrowError::CorruptImage {
            image: tarball.display().to_string(),
            message: format!("package has no {PACKAGE_MANIFEST}"),
        })?;
        let entry = ImageEntry {
            name: index.name,
            tag: index.tag,
            layers: index.layers,
            metadata: index.metadata,
            source: format!("package {}", tarball.display()),
            created_at: Utc::now(),
        };
        for layer in &entry.layers {
            if !ingested.contains(&layer.digest) && !self.store.has_blob(&layer.digest) {
                return Err(BurrowError::CorruptImage {
                    image: entry.reference(),
                    message: format!("package is missing blob {}", layer.digest),
                });
            }
        }
        for digest in order_layers(&entry)? {
            let _path = self.store.ensure_extracted(&digest)?;
        }
        self.catalog.register(entry.clone())?;
        tracing::info!(image = %entry.reference(), "image added");
        Ok(entry)
    }

    /// Deletes the extracted layers of an image, keeping its blobs. Returns
    /// how many layer directories were removed.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` for an unknown image.
    pub fn reset(&self, name: &str, tag: &str) -> Result<usize> {
        let entry = self.catalog.get(name, tag)?;
        let mut removed = 0;
        for layer in &entry.layers {
            if self.store.remove_layer(&layer.digest)? {
                removed += 1;
            }
        }
        tracing::info!(image = %entry.reference(), removed, "image layers reset");
        Ok(removed)
    }

    /// Removes an image and every layer and blob no other image uses.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` for an unknown image.
    pub fn delete(&self, name: &str, tag: &str) -> Result<ImageEntry> {
        let removed = self.catalog.remove(name, tag)?;
        let remaining = self.catalog.list()?;
        for layer in &removed.layers {
            if remaining.iter().any(|image| image.uses(&layer.digest)) {
                tracing::debug!(digest = %layer.digest, "layer still in use");
                continue;
            }
            let _ = self.store.remove_layer(&layer.digest)?;
            let _ = self.store.remove_blob(&layer.digest)?;
        }
        tracing::info!(image = %removed.reference(), "image deleted");
        Ok(removed)
    }

    /// Registers a new image made of `base`'s layers plus one new layer per
    /// directory in `layer_dirs`, each parented on the layer below it.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be packed or the base image
    /// has broken parent links.
    pub fn commit(
        &self,
        base: Option<&ImageEntry>,
        layer_dirs: &[&Path],
        name: &str,
        tag: &str,
        metadata: ImageMetadata,
        source: String,
    ) -> Result<ImageEntry> {
        let mut layers: Vec<(Digest, u64)> = Vec::new();
        if let Some(base) = base {
            for digest in order_layers(base)? {
                let size = base
                    .layers
                    .iter()
                    .find(|l| l.digest == digest)
                    .map_or(0, |l| l.size_bytes);
                layers.push((digest, size));
            }
        }

        for dir in layer_dirs {
            let layer = self
                .store
                .ingest_with(None, |out| pack_layer(dir, out))?;
            if layers.iter().any(|(d, _)| d == &layer.digest) {
                tracing::debug!(digest = %layer.digest, "identical layer already in stack");
                continue;
            }
            let _path = self.store.ensure_extracted(&layer.digest)?;
            layers.push((layer.digest, layer.size_bytes));
        }

        let entry = ImageEntry {
            name: name.to_string(),
            tag: tag.to_string(),
            layers: chain_layers(&layers),
            metadata,
            source,
            created_at: Utc::now(),
        };
        self.catalog.register(entry.clone())?;
        tracing::info!(image = %entry.reference(), layers = entry.layers.len(), "image committed");
        Ok(entry)
    }

    /// Uploads an image to `target`: missing layer blobs, then the config
    /// blob, then the manifest.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` if the image or one of its blobs is
    /// not kept locally, or any transport error.
    pub fn push(
        &self,
        transport: &dyn RegistryTransport,
        name: &str,
        tag: &str,
        target: &ImageRef,
    ) -> Result<ImageManifest> {
        let entry = self.catalog.get(name, tag)?;
        tracing::info!(image = %entry.reference(), target = %target, "pushing image");

        let mut descriptors = Vec::new();
        let mut diff_ids = Vec::new();
        for digest in order_layers(&entry)? {
            if !self.store.has_blob(&digest) {
                return Err(BurrowError::NotFound {
                    kind: "layer blob",
                    id: digest.to_string(),
                });
            }
            let blob = self.store.blob_path(&digest);
            let file = File::open(&blob).map_err(|e| BurrowError::io(&blob, e))?;
            let (diff_id, _len) = hash_reader(flate2::read::GzDecoder::new(file))
                .map_err(|e| BurrowError::io(&blob, e))?;
            diff_ids.push(diff_id.to_string());

            if transport.has_blob(target, &digest)? {
                tracing::debug!(digest = %digest, "blob already in registry");
            } else {
                transport.push_blob(target, &digest, &blob)?;
            }
            descriptors.push(Descriptor {
                media_type: MEDIA_TYPE_LAYER.into(),
                digest: digest.to_string(),
                size: self.store.blob_size(&digest)?,
            });
        }

        let config = serde_json::to_vec(&ImageConfig::from_metadata(&entry.metadata, diff_ids))?;
        let config_layer = self.store.ingest_with(None, |out| {
            out.write_all(&config)
                .map_err(|e| BurrowError::io(self.store.root(), e))
        })?;
        let outcome = self.push_config(transport, target, &config_layer.digest);
        let _ = self.store.remove_blob(&config_layer.digest);
        outcome?;

        let manifest = ImageManifest::new(
            Descriptor {
                media_type: MEDIA_TYPE_CONFIG.into(),
                digest: config_layer.digest.to_string(),
                size: config_layer.size_bytes,
            },
            descriptors,
        );
        transport.push_manifest(target, &manifest)?;
        tracing::info!(target = %target, "image pushed");
        Ok(manifest)
    }

    fn push_config(
        &self,
        transport: &dyn RegistryTransport,
        target: &ImageRef,
        digest: &Digest,
    ) -> Result<()> {
        if !transport.has_blob(target, digest)? {
            transport.push_blob(target, digest, &self.store.blob_path(digest))?;
        }
        Ok(())
    }
}
