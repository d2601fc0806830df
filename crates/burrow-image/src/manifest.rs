//! Registry manifest and image config types.

use serde::{Deserialize, Serialize};

use crate::catalog::ImageMetadata;

/// Docker v2 single-platform manifest.
pub const MEDIA_TYPE_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker v2 manifest list.
pub const MEDIA_TYPE_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
/// OCI image manifest.
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index.
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// Docker image config blob.
pub const MEDIA_TYPE_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
/// Gzip tar layer blob.
pub const MEDIA_TYPE_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Single-platform image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    /// Schema version (2).
    pub schema_version: u32,
    /// Media type.
    #[serde(default)]
    pub media_type: String,
    /// Config descriptor.
    pub config: Descriptor,
    /// Layer descriptors, bottom to top.
    pub layers: Vec<Descriptor>,
}

impl ImageManifest {
    /// Builds a Docker v2 manifest.
    #[must_use]
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: MEDIA_TYPE_MANIFEST_V2.into(),
            config,
            layers,
        }
    }
}

/// Multi-platform manifest list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestList {
    /// Schema version (2).
    pub schema_version: u32,
    /// Platform-specific manifests.
    pub manifests: Vec<PlatformManifest>,
}

/// Platform-specific entry of a manifest list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformManifest {
    /// Content digest of the referenced manifest.
    pub digest: String,
    /// Platform of the referenced manifest.
    pub platform: Platform,
}

/// Platform of a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    /// CPU architecture.
    pub architecture: String,
    /// Operating system.
    pub os: String,
}

/// Content descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type.
    pub media_type: String,
    /// Content digest.
    pub digest: String,
    /// Content size.
    pub size: u64,
}

/// Image config blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Architecture.
    #[serde(default)]
    pub architecture: String,
    /// Operating system.
    #[serde(default)]
    pub os: String,
    /// Runtime configuration.
    #[serde(default)]
    pub config: ContainerConfigSpec,
    /// Uncompressed layer digests.
    #[serde(default)]
    pub rootfs: RootFs,
}

/// Runtime part of an image config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfigSpec {
    /// Environment variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
    /// Entrypoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    /// Command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    /// Working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

/// Root filesystem section of an image config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootFs {
    /// Always `layers`.
    #[serde(rename = "type")]
    pub fs_type: String,
    /// Uncompressed layer digests, bottom to top.
    pub diff_ids: Vec<String>,
}

impl Default for RootFs {
    fn default() -> Self {
        Self {
            fs_type: "layers".into(),
            diff_ids: Vec::new(),
        }
    }
}

impl ImageConfig {
    /// The runtime defaults burrow keeps in its catalog.
    #[must_use]
    pub fn metadata(&self) -> ImageMetadata {
        ImageMetadata {
            entrypoint: self.config.entrypoint.clone().unwrap_or_default(),
            cmd: self.config.cmd.clone().unwrap_or_default(),
            env: self.config.env.clone().unwrap_or_default(),
            working_dir: self.config.working_dir.clone().filter(|w| !w.is_empty()),
        }
    }

    /// Builds a linux config for the host architecture from catalog metadata.
    #[must_use]
    pub fn from_metadata(metadata: &ImageMetadata, diff_ids: Vec<String>) -> Self {
        let non_empty = |v: &Vec<String>| (!v.is_empty()).then(|| v.clone());
        Self {
            architecture: current_arch().into(),
            os: "linux".into(),
            config: ContainerConfigSpec {
                env: non_empty(&metadata.env),
                entrypoint: non_empty(&metadata.entrypoint),
                cmd: non_empty(&metadata.cmd),
                working_dir: metadata.working_dir.clone(),
            },
            rootfs: RootFs {
                fs_type: "layers".into(),
                diff_ids,
            },
        }
    }
}

/// Selects the linux manifest for the host architecture.
#[must_use]
pub fn select_platform_manifest(list: &ManifestList) -> Option<&PlatformManifest> {
    let arch = current_arch();
    list.manifests
        .iter()
        .find(|m| m.platform.os == "linux" && m.platform.architecture == arch)
}

/// Host architecture in Docker/OCI naming.
#[must_use]
pub fn current_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        a => a,
    }
}
