//! Durable key/value storage for client-side notification state.
//!
//! Values are opaque strings (JSON documents) stored under namespaced keys.
//! The file backend keeps every key in one JSON object at
//! `~/.siga/storage.json` and replaces the file atomically on write.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::NotifyError;

/// Bearer token written by the web app's login flow.
pub const AUTH_TOKEN_KEY: &str = "siga.auth.token";

/// A string key/value store. Implementations must be safe to call from timer tasks.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, NotifyError>;
    fn set(&self, key: &str, value: &str) -> Result<(), NotifyError>;
    fn remove(&self, key: &str) -> Result<(), NotifyError>;
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, NotifyError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), NotifyError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), NotifyError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// File-backed store: a single JSON object of string values.
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write of the file within this process
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>, NotifyError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            NotifyError::Storage(format!(
                "Failed to parse {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn write_all(&self, entries: &HashMap<String, String>) -> Result<(), NotifyError> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| NotifyError::Storage(format!("Serialize error: {}", e)))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, NotifyError> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), NotifyError> {
        let _guard = self.lock.lock();
        // A corrupt file is replaced rather than blocking every future write
        let mut entries = self.read_all().unwrap_or_else(|e| {
            log::warn!("Storage: discarding unreadable store: {}", e);
            HashMap::new()
        });
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), NotifyError> {
        let _guard = self.lock.lock();
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

/// Read the bearer token, treating blanks and storage failures as "no token".
pub fn read_auth_token(store: &dyn KeyValueStore) -> Option<String> {
    match store.get(AUTH_TOKEN_KEY) {
        Ok(Some(token)) => {
            let token = token.trim().trim_matches('"').to_string();
            if token.is_empty() {
                None
            } else {
                Some(token)
            }
        }
        Ok(None) => None,
        Err(e) => {
            log::debug!("Storage: could not read auth token: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp.path().join("storage.json"));

        assert_eq!(store.get("siga.a").unwrap(), None);
        store.set("siga.a", "1").unwrap();
        store.set("siga.b", "{\"x\":2}").unwrap();

        let reopened = JsonFileStore::new(temp.path().join("storage.json"));
        assert_eq!(reopened.get("siga.a").unwrap().as_deref(), Some("1"));
        assert_eq!(reopened.get("siga.b").unwrap().as_deref(), Some("{\"x\":2}"));

        reopened.remove("siga.a").unwrap();
        assert_eq!(reopened.get("siga.a").unwrap(), None);
    }

    #[test]
    fn test_file_store_corrupt_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("storage.json");
        fs::write(&path, "{ not json").unwrap();
        let store = JsonFileStore::new(&path);

        assert!(store.get("siga.a").is_err());
        store.set("siga.a", "ok").unwrap();
        assert_eq!(store.get("siga.a").unwrap().as_deref(), Some("ok"));
    }

    #[test]
    fn test_file_store_creates_parent_dir() {
        let temp = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp.path().join("nested").join("storage.json"));
        store.set("siga.a", "1").unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_read_auth_token() {
        let store = MemoryStore::new();
        assert_eq!(read_auth_token(&store), None);

        store.set(AUTH_TOKEN_KEY, "  ").unwrap();
        assert_eq!(read_auth_token(&store), None);

        store.set(AUTH_TOKEN_KEY, "\"abc123\"").unwrap();
        assert_eq!(read_auth_token(&store).as_deref(), Some("abc123"));
    }
}
