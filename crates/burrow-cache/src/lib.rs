//! # burrow-cache
//!
//! Cross-invocation settings storage for burrow containers.
//!
//! The cache is an external memcached-compatible server; this crate only
//! speaks its text protocol ([`client::MemcachedClient`]), offers an
//! in-process stand-in ([`memory::MemoryCache`]), and starts the server
//! from the support bundle when it is not already listening
//! ([`server::ensure_running`]).
//!
//! Keys are namespaced per container: `<id>:<name>` holds a raw value
//! and `<id>:remap` holds the container's remap table as JSON.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod client;
pub mod memory;
pub mod server;

use serde::Serialize;
use serde::de::DeserializeOwned;

use burrow_common::error::Result;

/// Name used for the cache in errors and logs.
pub const SERVICE_NAME: &str = "settings cache";

/// Key suffix holding a container's remap table.
pub const REMAP_KEY: &str = "remap";

/// Key of a named setting of a container.
#[must_use]
pub fn setting_key(container_id: &str, name: &str) -> String {
    format!("{container_id}:{name}")
}

/// Key of a container's remap table.
#[must_use]
pub fn remap_key(container_id: &str) -> String {
    setting_key(container_id, REMAP_KEY)
}

/// String-valued key/value store shared across invocations.
pub trait SettingsCache: Send + Sync {
    /// Reads a value.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::ExternalServiceUnavailable` if the server cannot
    /// be reached, or `BurrowError::MalformedInput` for an invalid key.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores a value.
    ///
    /// # Errors
    ///
    /// Same as [`SettingsCache::get`].
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Deletes a value. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Same as [`SettingsCache::get`].
    fn delete(&self, key: &str) -> Result<bool>;

    /// Checks that the cache answers.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::ExternalServiceUnavailable` if it does not.
    fn ping(&self) -> Result<()>;
}

/// JSON-typed access on top of any [`SettingsCache`].
pub trait SettingsCacheExt: SettingsCache {
    /// Reads and decodes a JSON value.
    ///
    /// # Errors
    ///
    /// Returns the cache error, or `BurrowError::Serialization` if the stored
    /// value is not valid JSON for `T`.
    fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Encodes and stores a JSON value.
    ///
    /// # Errors
    ///
    /// Returns the cache error or a serialization error.
    fn set_typed<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw)
    }
}

impl<C: SettingsCache + ?Sized> SettingsCacheExt for C {}
