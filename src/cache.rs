use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Key/value store for results of remote calls. Entries older than the TTL
/// and entries that fail to decode read as misses.
pub trait TtlCache {
    fn get(&self, key: &str) -> Option<Value>;
    fn put(&self, key: &str, value: &Value) -> Result<()>;
    /// Remove every entry, returning how many were dropped.
    fn clear(&self) -> Result<usize>;
}

#[derive(Serialize, Deserialize)]
struct Stored {
    stored_at: DateTime<Utc>,
    value: Value,
}

pub fn cache_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// One JSON file per key under `dir`, named by the key's SHA-256.
pub struct FileCache {
    dir: PathBuf,
    ttl: Duration,
}

impl FileCache {
    pub fn new(dir: PathBuf, ttl: Duration) -> Self {
        Self { dir, ttl }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", cache_key(key)))
    }
}

impl TtlCache for FileCache {
    fn get(&self, key: &str) -> Option<Value> {
        let path = self.path_for(key);
        let content = std::fs::read_to_string(&path).ok()?;
        let stored: Stored = match serde_json::from_str(&content) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::debug!("cache entry {} unreadable: {e}", path.display());
                return None;
            }
        };
        if Utc::now() - stored.stored_at > self.ttl {
            tracing::debug!("cache entry {} expired", path.display());
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::debug!("could not remove expired entry {}: {e}", path.display());
            }
            return None;
        }
        Some(stored.value)
    }

    fn put(&self, key: &str, value: &Value) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let stored = Stored {
            stored_at: Utc::now(),
            value: value.clone(),
        };
        std::fs::write(self.path_for(key), serde_json::to_string(&stored)?)?;
        Ok(())
    }

    fn clear(&self) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
pub(crate) struct MemoryCache {
    entries: std::cell::RefCell<std::collections::HashMap<String, Value>>,
}

#[cfg(test)]
impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Default::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

#[cfg(test)]
impl TtlCache for MemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.borrow().get(key).cloned()
    }

    fn put(&self, key: &str, value: &Value) -> Result<()> {
        self.entries.borrow_mut().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn clear(&self) -> Result<usize> {
        let mut entries = self.entries.borrow_mut();
        let n = entries.len();
        entries.clear();
        Ok(n)
    }
}
