//! Key/value storage for page snapshots.

use ahash::AHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::error::LiveError;

/// String-keyed, string-valued store.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, LiveError>;
    fn set(&self, key: &str, value: &str) -> Result<(), LiveError>;
    fn remove(&self, key: &str) -> Result<(), LiveError>;
}

/// Session-scoped store. Contents die with the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<AHashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AHashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StorageBackend for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, LiveError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LiveError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LiveError> {
        self.lock().remove(key);
        Ok(())
    }
}

/// Durable store: one file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<data dir>/soli_live`, if the platform has a data directory.
    pub fn default_location() -> Option<Self> {
        dirs::data_local_dir().map(|d| Self::new(d.join("soli_live")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(key)))
    }
}

impl StorageBackend for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, LiveError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LiveError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LiveError> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// JSON values on top of a [`StorageBackend`], under a key prefix.
pub struct LocalStore<'a> {
    backend: &'a dyn StorageBackend,
    prefix: &'a str,
}

impl<'a> LocalStore<'a> {
    pub fn new(backend: &'a dyn StorageBackend) -> Self {
        Self::with_prefix(backend, "")
    }

    pub fn with_prefix(backend: &'a dyn StorageBackend, prefix: &'a str) -> Self {
        Self { backend, prefix }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Unreadable or unparseable entries load as `None`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let key = self.key(key);
        let raw = match self.backend.get(&key) {
            Ok(raw) => raw?,
            Err(e) => {
                debug!(key = %key, "storage read failed: {}", e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key = %key, "discarding unparseable entry: {}", e);
                None
            }
        }
    }

    /// `defaults` with any stored object keys laid over it.
    pub fn load_or(&self, key: &str, defaults: JsonValue) -> JsonValue {
        match (defaults, self.load::<JsonValue>(key)) {
            (JsonValue::Object(mut merged), Some(JsonValue::Object(stored))) => {
                merged.extend(stored);
                JsonValue::Object(merged)
            }
            (defaults, _) => defaults,
        }
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), LiveError> {
        let raw = serde_json::to_string(value)?;
        self.backend.set(&self.key(key), &raw)
    }

    pub fn remove(&self, key: &str) -> Result<(), LiveError> {
        self.backend.remove(&self.key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        storage.set("a", "1").unwrap();
        assert_eq!(storage.get("a").unwrap().as_deref(), Some("1"));
        storage.remove("a").unwrap();
        assert_eq!(storage.get("a").unwrap(), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("nested"));
        assert_eq!(storage.get("/posts?page=1").unwrap(), None);

        storage.set("/posts?page=1", "{}").unwrap();
        assert_eq!(storage.get("/posts?page=1").unwrap().as_deref(), Some("{}"));

        storage.remove("/posts?page=1").unwrap();
        storage.remove("/posts?page=1").unwrap();
        assert_eq!(storage.get("/posts?page=1").unwrap(), None);
    }

    #[test]
    fn test_local_store_ignores_garbage() {
        let storage = MemoryStorage::new();
        storage.set("bad", "not json").unwrap();
        let store = LocalStore::new(&storage);

        assert_eq!(store.load::<BTreeMap<String, u32>>("bad"), None);
        let mut value = BTreeMap::new();
        value.insert("x".to_string(), 1u32);
        store.save("good", &value).unwrap();
        assert_eq!(store.load::<BTreeMap<String, u32>>("good"), Some(value));
    }

    #[test]
    fn test_prefixed_store_merges_defaults() {
        let storage = MemoryStorage::new();
        let store = LocalStore::with_prefix(&storage, "prefs:");
        store.save("ui", &json!({"theme": "dark"})).unwrap();
        assert_eq!(storage.get("prefs:ui").unwrap().as_deref(), Some(r#"{"theme":"dark"}"#));

        let merged = store.load_or("ui", json!({"theme": "light", "compact": false}));
        assert_eq!(merged, json!({"theme": "dark", "compact": false}));
        assert_eq!(store.load_or("missing", json!({"a": 1})), json!({"a": 1}));
    }
}
