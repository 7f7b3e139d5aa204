//! Ephemeral client-side flags: kiosk mode and the auth token.
//!
//! A missing key is a normal state ("not in kiosk mode", "not
//! authenticated"), never an error.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

pub const KIOSK_MODE_KEY: &str = "kioskMode";
pub const AUTH_TOKEN_KEY: &str = "token";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait FlagStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Process-lifetime store.
#[derive(Default)]
pub struct MemoryFlagStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlagStore for MemoryFlagStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.values).remove(key);
        Ok(())
    }
}

/// JSON file store, meant to live under the user's runtime directory so it
/// disappears with the login session.
pub struct FileFlagStore {
    path: PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl FileFlagStore {
    /// Open the store, treating a missing or unreadable file as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt flag file");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    fn persist(&self, values: &HashMap<String, String>) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(values)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl FlagStore for FileFlagStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = lock(&self.values);
        let previous = values.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&values) {
            match previous {
                Some(v) => values.insert(key.to_string(), v),
                None => values.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut values = lock(&self.values);
        let Some(previous) = values.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&values) {
            values.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_absent_key() {
        let store = MemoryFlagStore::new();
        assert_eq!(store.get(KIOSK_MODE_KEY), None);
        store.remove(KIOSK_MODE_KEY).unwrap();
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiosk/flags.json");

        let store = FileFlagStore::open(&path);
        store.set(KIOSK_MODE_KEY, "true").unwrap();
        store.set(AUTH_TOKEN_KEY, "abc").unwrap();
        store.remove(AUTH_TOKEN_KEY).unwrap();

        let reopened = FileFlagStore::open(&path);
        assert_eq!(reopened.get(KIOSK_MODE_KEY).as_deref(), Some("true"));
        assert_eq!(reopened.get(AUTH_TOKEN_KEY), None);
    }

    #[test]
    fn test_file_store_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.json");
        std::fs::write(&path, b"not json").unwrap();
        let store = FileFlagStore::open(&path);
        assert_eq!(store.get(KIOSK_MODE_KEY), None);
    }
}
