//! Durable key/value storage backends for the session store
//!
//! The session is persisted as two string entries (`token` and `user`), matching
//! the layout the mobile client keeps in its device key/value store.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::PersistenceError;

// ----------------------------------------------------------------------------
// Storage Trait
// ----------------------------------------------------------------------------

/// String key/value storage abstraction
pub trait KeyValueStore: Send {
    /// Read a value by key
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    /// Write a value, replacing any previous one
    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError>;

    /// Remove a value; removing a missing key is not an error
    fn remove(&mut self, key: &str) -> Result<(), PersistenceError>;
}

// ----------------------------------------------------------------------------
// Memory Storage Implementation
// ----------------------------------------------------------------------------

/// In-memory storage for tests and for platforms without durable storage
#[derive(Debug)]
pub struct MemoryStore {
    data: BTreeMap<String, String>,
    available: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new memory store
    pub fn new() -> Self {
        Self {
            data: BTreeMap::new(),
            available: true,
        }
    }

    /// Create a store whose every operation fails, simulating a locked device store
    pub fn unavailable() -> Self {
        Self {
            data: BTreeMap::new(),
            available: false,
        }
    }

    /// Toggle availability
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.available {
            Ok(())
        } else {
            Err(PersistenceError::unavailable("memory store disabled"))
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        self.check()?;
        Ok(self.data.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.check()?;
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PersistenceError> {
        self.check()?;
        self.data.remove(key);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// File Storage Implementation
// ----------------------------------------------------------------------------

/// JSON-file storage holding a flat string map
///
/// Writes go to a sibling temp file that is renamed over the target, so a crash
/// mid-write leaves either the old or the new map on disk.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, PersistenceError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(map)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Wrote {} session entries to {}", map.len(), self.path.display());
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.read_map()?.remove(key))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)
    }

    fn remove(&mut self, key: &str) -> Result<(), PersistenceError> {
        let mut map = match self.read_map() {
            Ok(map) => map,
            // A corrupt file is replaced rather than blocking logout
            Err(PersistenceError::Serialization(_)) => BTreeMap::new(),
            Err(err) => return Err(err),
        };
        if map.remove(key).is_some() || self.path.exists() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("birtu-storage-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let mut store = MemoryStore::new();
        store.set("token", "abc").unwrap();
        assert_eq!(store.get("token").unwrap().as_deref(), Some("abc"));
        store.remove("token").unwrap();
        store.remove("token").unwrap();
        assert_eq!(store.get("token").unwrap(), None);
    }

    #[test]
    fn test_unavailable_memory_store_fails() {
        let mut store = MemoryStore::unavailable();
        assert!(store.set("token", "abc").is_err());
        assert!(store.get("token").is_err());
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let path = temp_path("session.json");
        let mut store = FileStore::new(&path);
        store.set("token", "abc").unwrap();
        store.set("user", "{\"id\":\"u1\"}").unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get("token").unwrap().as_deref(), Some("abc"));
        assert_eq!(reopened.get("missing").unwrap(), None);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_file_store_missing_file_reads_empty() {
        let store = FileStore::new(temp_path("never-written.json"));
        assert_eq!(store.get("token").unwrap(), None);
    }

    #[test]
    fn test_file_store_corrupt_file() {
        let path = temp_path("session.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();

        let mut store = FileStore::new(&path);
        assert!(matches!(
            store.get("token"),
            Err(PersistenceError::Serialization(_))
        ));
        store.remove("token").unwrap();
        assert_eq!(store.get("token").unwrap(), None);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
