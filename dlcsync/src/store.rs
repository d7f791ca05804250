//! Small persistent key-value store.
//!
//! The pipeline only needs to remember one thing across launches: that DLC
//! has been installed at least once. A missing local manifest combined with
//! that marker means the writable cache was purged from outside.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

/// Key-value persistence consumed by the content pipeline.
pub trait PersistentStore: Send + Sync {
    /// Check whether a key has a value.
    fn has_value(&self, key: &str) -> bool;

    /// Set a value and persist it.
    fn set_value(&self, key: &str, value: &str) -> io::Result<()>;
}

/// In-memory store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a stored value.
    pub fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }
}

impl PersistentStore for MemoryStore {
    fn has_value(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }

    fn set_value(&self, key: &str, value: &str) -> io::Result<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Store persisted as a JSON object in a single file.
///
/// The file is read once on open and rewritten on every `set_value`.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let values = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e),
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistentStore for JsonFileStore {
    fn has_value(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }

    fn set_value(&self, key: &str, value: &str) -> io::Result<()> {
        let mut values = self.values.lock();
        values.insert(key.to_string(), value.to_string());

        let json = serde_json::to_vec_pretty(&*values)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(!store.has_value("k"));

        store.set_value("k", "v").unwrap();
        assert!(store.has_value("k"));
        assert_eq!(store.get("k").as_deref(), Some("v"));
    }

    #[test]
    fn test_json_store_persists_across_open() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state/store.json");

        let store = JsonFileStore::open(&path).unwrap();
        assert!(!store.has_value("_CMSCachedDLC"));
        store.set_value("_CMSCachedDLC", "true").unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert!(reopened.has_value("_CMSCachedDLC"));
    }

    #[test]
    fn test_json_store_rejects_garbage() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.json");
        fs::write(&path, b"not json").unwrap();

        let err = JsonFileStore::open(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
