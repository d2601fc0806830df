//! Image reference parsing.

use std::fmt;

use burrow_common::constants::DEFAULT_REGISTRY;
use burrow_common::error::{BurrowError, Result};

/// A parsed `[registry/]repository[:tag]` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    /// Registry host (e.g., "docker.io").
    pub registry: String,
    /// Repository path (e.g., "library/ubuntu").
    pub repository: String,
    /// Tag or digest.
    pub tag: String,
}

impl ImageRef {
    /// Parses an image reference, defaulting the registry to `docker.io`
    /// and the tag to `latest`.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::MalformedInput` for an empty repository or tag.
    pub fn parse(s: &str) -> Result<Self> {
        Self::parse_with_registry(s, DEFAULT_REGISTRY)
    }

    /// Like [`ImageRef::parse`] with a different default registry.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::MalformedInput` for an empty repository or tag.
    pub fn parse_with_registry(s: &str, default_registry: &str) -> Result<Self> {
        let s = s.trim();
        let (registry, rest) = match s.split_once('/') {
            Some((host, rest))
                if host.contains('.') || host.contains(':') || host == "localhost" =>
            {
                (host, rest)
            }
            _ => (default_registry, s),
        };

        let (repository, tag) = if let Some((repo, digest)) = rest.split_once('@') {
            (repo, digest)
        } else {
            match rest.rsplit_once(':') {
                Some((repo, tag)) if !tag.contains('/') => (repo, tag),
                _ => (rest, "latest"),
            }
        };

        if repository.is_empty() || tag.is_empty() {
            return Err(BurrowError::MalformedInput {
                input: s.to_string(),
                message: "expected [registry/]repository[:tag]".into(),
            });
        }

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository.to_string()
        };

        Ok(Self {
            registry: registry.to_string(),
            repository,
            tag: tag.to_string(),
        })
    }

    /// Builds a reference from separate name and tag arguments.
    ///
    /// # Errors
    ///
    /// Same as [`ImageRef::parse`].
    pub fn from_parts(name: &str, tag: &str) -> Result<Self> {
        Self::parse(&format!("{name}:{tag}"))
    }

    /// Name under which the image is kept in the local catalog:
    /// `ubuntu` for official images, `owner/app` for other Docker Hub
    /// repositories, `host/owner/app` elsewhere.
    #[must_use]
    pub fn catalog_name(&self) -> String {
        if self.registry == DEFAULT_REGISTRY {
            self.repository
                .strip_prefix("library/")
                .unwrap_or(&self.repository)
                .to_string()
        } else {
            format!("{}/{}", self.registry, self.repository)
        }
    }

    /// Returns the full image name.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_official_image() {
        let r = ImageRef::parse("alpine").expect("parse");
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/alpine");
        assert_eq!(r.tag, "latest");
        assert_eq!(r.catalog_name(), "alpine");
    }

    #[test]
    fn parse_tagged_and_namespaced() {
        let r = ImageRef::parse("nginx:1.25").expect("parse");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, "1.25");

        let r = ImageRef::parse("bitnami/redis:7").expect("parse");
        assert_eq!(r.repository, "bitnami/redis");
        assert_eq!(r.catalog_name(), "bitnami/redis");
    }

    #[test]
    fn parse_other_registry_with_port() {
        let r = ImageRef::parse("localhost:5000/team/app:v1").expect("parse");
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "team/app");
        assert_eq!(r.tag, "v1");
        assert_eq!(r.catalog_name(), "localhost:5000/team/app");
    }

    #[test]
    fn parse_rejects_empty_tag() {
        assert!(ImageRef::parse("ubuntu:").is_err());
        assert!(ImageRef::parse("").is_err());
    }
}
