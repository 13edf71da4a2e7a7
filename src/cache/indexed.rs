//! Named key/value sub-caches persisted inside a cache directory
//!
//! Each indexed cache is a JSON object stored at `<dir>/<name>.json`. Keys and
//! values go through serde, so any serializable type can be stored.

use crate::error::{DirCacheError, DirCacheResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// File extension of indexed cache files
pub const INDEX_EXTENSION: &str = "json";

/// Describes an indexed cache to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedCacheParameters {
    name: String,
}

impl IndexedCacheParameters {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> DirCacheResult<()> {
        let invalid = self.name.is_empty()
            || self.name.starts_with('.')
            || self.name.contains(['/', '\\']);
        if invalid {
            return Err(DirCacheError::User(format!(
                "Invalid indexed cache name: '{}'",
                self.name
            )));
        }
        Ok(())
    }
}

/// A persistent key/value map backed by one file
///
/// Clones share the same in-memory entries.
#[derive(Debug, Clone)]
pub struct IndexedCache {
    name: String,
    path: PathBuf,
    entries: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl IndexedCache {
    /// Open the indexed cache described by `parameters` inside `dir`,
    /// loading existing entries
    pub fn open(dir: &Path, parameters: IndexedCacheParameters) -> DirCacheResult<Self> {
        parameters.validate()?;
        let path = dir.join(format!("{}.{}", parameters.name, INDEX_EXTENSION));

        let entries = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| {
                DirCacheError::io(format!("reading indexed cache {}", path.display()), e)
            })?;
            serde_json::from_str(&content)?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            name: parameters.name,
            path,
            entries: Arc::new(Mutex::new(entries)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get<K, V>(&self, key: &K) -> DirCacheResult<Option<V>>
    where
        K: Serialize + ?Sized,
        V: DeserializeOwned,
    {
        let key = encode_key(key)?;
        match self.entries().get(&key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Insert or replace an entry and persist the cache
    ///
    /// Entries are left unchanged when persisting fails.
    pub fn put<K, V>(&self, key: &K, value: &V) -> DirCacheResult<()>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        let key = encode_key(key)?;
        let value = serde_json::to_value(value)?;
        let mut entries = self.entries();
        let previous = entries.insert(key.clone(), value);

        if let Err(e) = self.persist(&entries) {
            match previous {
                Some(previous) => entries.insert(key, previous),
                None => entries.remove(&key),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Remove an entry, returning whether it was present
    ///
    /// The entry is kept when persisting fails.
    pub fn remove<K>(&self, key: &K) -> DirCacheResult<bool>
    where
        K: Serialize + ?Sized,
    {
        let key = encode_key(key)?;
        let mut entries = self.entries();
        let Some(previous) = entries.remove(&key) else {
            return Ok(false);
        };

        if let Err(e) = self.persist(&entries) {
            entries.insert(key, previous);
            return Err(e);
        }
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, entries: &BTreeMap<String, Value>) -> DirCacheResult<()> {
        let content = serde_json::to_string(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .map_err(|e| DirCacheError::io(format!("writing indexed cache {}", tmp.display()), e))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            DirCacheError::io(format!("replacing indexed cache {}", self.path.display()), e)
        })
    }
}

/// String keys are stored as-is; anything else as its JSON text
fn encode_key<K: Serialize + ?Sized>(key: &K) -> DirCacheResult<String> {
    match serde_json::to_value(key)? {
        Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}
