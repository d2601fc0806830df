//! In-process settings cache.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use burrow_common::error::Result;

use crate::SettingsCache;
use crate::client::validate_key;

/// A [`SettingsCache`] backed by a map in this process.
///
/// Used by tests and by the RPC server when no cache server is reachable.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SettingsCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.remove(key).is_some())
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete() {
        let cache = MemoryCache::new();
        assert!(cache.get("a:b").unwrap().is_none());
        cache.set("a:b", "value").unwrap();
        assert_eq!(cache.get("a:b").unwrap().as_deref(), Some("value"));
        assert!(cache.delete("a:b").unwrap());
        assert!(!cache.delete("a:b").unwrap());
        assert!(cache.is_empty());
    }

    #[test]
    fn rejects_keys_with_spaces() {
        let cache = MemoryCache::new();
        assert!(cache.set("a b", "v").is_err());
    }
}
