//! Local image catalog management.
//!
//! Maintains an index of available images, their layer parent links, and
//! the runtime metadata taken from their config blob.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use burrow_common::error::{BurrowError, Result};
use burrow_common::types::Digest;

/// One layer of an image together with the layer beneath it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRef {
    /// Digest of the compressed layer blob.
    pub digest: Digest,
    /// Layer beneath this one in this image, `None` for the base layer.
    pub parent: Option<Digest>,
    /// Size of the compressed blob.
    #[serde(default)]
    pub size_bytes: u64,
}

/// Runtime defaults carried by an image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Entrypoint prepended to the command.
    #[serde(default)]
    pub entrypoint: Vec<String>,
    /// Default command.
    #[serde(default)]
    pub cmd: Vec<String>,
    /// `KEY=value` environment entries.
    #[serde(default)]
    pub env: Vec<String>,
    /// Working directory inside the root.
    #[serde(default)]
    pub working_dir: Option<String>,
}

impl ImageMetadata {
    /// The command a container runs when none is given.
    #[must_use]
    pub fn default_command(&self) -> Vec<String> {
        self.entrypoint.iter().chain(self.cmd.iter()).cloned().collect()
    }
}

/// Entry in the local image catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    /// Image name, e.g. `ubuntu` or `ghcr.io/owner/app`.
    pub name: String,
    /// Tag.
    pub tag: String,
    /// Layers as stored; order is rebuilt from the parent links.
    pub layers: Vec<LayerRef>,
    /// Runtime defaults.
    #[serde(default)]
    pub metadata: ImageMetadata,
    /// Where the image came from (`registry`, `package`, `commit`).
    pub source: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ImageEntry {
    /// `name:tag`.
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }

    /// Total compressed size of the layers.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.layers.iter().map(|l| l.size_bytes).sum()
    }

    /// Whether the image uses `digest`.
    #[must_use]
    pub fn uses(&self, digest: &Digest) -> bool {
        self.layers.iter().any(|l| &l.digest == digest)
    }
}

/// Links `digests` (bottom to top) into parent-linked layer references.
#[must_use]
pub fn chain_layers(layers: &[(Digest, u64)]) -> Vec<LayerRef> {
    let mut parent = None;
    layers
        .iter()
        .map(|(digest, size_bytes)| LayerRef {
            digest: digest.clone(),
            parent: parent.replace(digest.clone()),
            size_bytes: *size_bytes,
        })
        .collect()
}

/// Image catalog backed by a JSON file.
#[derive(Debug, Clone)]
pub struct ImageCatalog {
    catalog_path: PathBuf,
}

impl ImageCatalog {
    /// Opens or creates an image catalog under the given directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog directory cannot be created.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let catalog_path = data_dir.join("images").join("catalog.json");
        if let Some(parent) = catalog_path.parent() {
            fs::create_dir_all(parent).map_err(|e| BurrowError::io(parent, e))?;
        }
        Ok(Self { catalog_path })
    }

    /// Lists all images in the catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog file cannot be read or parsed.
    pub fn list(&self) -> Result<Vec<ImageEntry>> {
        if !self.catalog_path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.catalog_path)
            .map_err(|e| BurrowError::io(&self.catalog_path, e))?;
        let entries: Vec<ImageEntry> = serde_json::from_str(&content)?;
        Ok(entries)
    }

    /// Looks an image up by name and tag.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` if it is not in the catalog.
    pub fn get(&self, name: &str, tag: &str) -> Result<ImageEntry> {
        self.list()?
            .into_iter()
            .find(|e| e.name == name && e.tag == tag)
            .ok_or_else(|| BurrowError::NotFound {
                kind: "image",
                id: format!("{name}:{tag}"),
            })
    }

    /// Registers an image, replacing any entry with the same name and tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read or written.
    pub fn register(&self, entry: ImageEntry) -> Result<()> {
        let mut entries = self.list()?;
        entries.retain(|e| !(e.name == entry.name && e.tag == entry.tag));
        tracing::info!(image = %entry.reference(), layers = entry.layers.len(), "image registered");
        entries.push(entry);
        self.write_entries(&entries)
    }

    /// Removes an image and returns its entry.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` if no such image exists.
    pub fn remove(&self, name: &str, tag: &str) -> Result<ImageEntry> {
        let mut entries = self.list()?;
        let index = entries
            .iter()
            .position(|e| e.name == name && e.tag == tag)
            .ok_or_else(|| BurrowError::NotFound {
                kind: "image",
                id: format!("{name}:{tag}"),
            })?;
        let removed = entries.remove(index);
        self.write_entries(&entries)?;
        Ok(removed)
    }

    fn write_entries(&self, entries: &[ImageEntry]) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.catalog_path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| BurrowError::io(&tmp, e))?;
        fs::rename(&tmp, &self.catalog_path).map_err(|e| BurrowError::io(&self.catalog_path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;

    fn make_entry(name: &str, tag: &str, blobs: &[&[u8]]) -> ImageEntry {
        let layers: Vec<_> = blobs.iter().map(|b| (hash_bytes(b), b.len() as u64)).collect();
        ImageEntry {
            name: name.into(),
            tag: tag.into(),
            layers: chain_layers(&layers),
            metadata: ImageMetadata::default(),
            source: "registry".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn catalog_empty_on_first_open() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let catalog = ImageCatalog::open(dir.path()).expect("open failed");
        assert!(catalog.list().expect("list failed").is_empty());
    }

    #[test]
    fn register_replaces_same_reference() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let catalog = ImageCatalog::open(dir.path()).expect("open failed");
        catalog.register(make_entry("alpine", "3.19", &[b"a"])).expect("register");
        catalog.register(make_entry("alpine", "3.19", &[b"a", b"b"])).expect("register");
        catalog.register(make_entry("debian", "12", &[b"c"])).expect("register");

        let entries = catalog.list().expect("list failed");
        assert_eq!(entries.len(), 2);
        let alpine = catalog.get("alpine", "3.19").expect("get");
        assert_eq!(alpine.layers.len(), 2);
        assert_eq!(alpine.size_bytes(), 2);
    }

    #[test]
    fn chain_links_each_layer_to_the_one_below() {
        let entry = make_entry("img", "v1", &[b"base", b"mid", b"top"]);
        assert_eq!(entry.layers[0].parent, None);
        assert_eq!(entry.layers[1].parent.as_ref(), Some(&entry.layers[0].digest));
        assert_eq!(entry.layers[2].parent.as_ref(), Some(&entry.layers[1].digest));
    }

    #[test]
    fn remove_nonexistent_returns_not_found() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let catalog = ImageCatalog::open(dir.path()).expect("open failed");
        let err = catalog.remove("ghost", "latest").unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn default_command_joins_entrypoint_and_cmd() {
        let meta = ImageMetadata {
            entrypoint: vec!["/docker-entrypoint.sh".into()],
            cmd: vec!["nginx".into(), "-g".into()],
            ..ImageMetadata::default()
        };
        assert_eq!(meta.default_command(), vec!["/docker-entrypoint.sh", "nginx", "-g"]);
    }
}
