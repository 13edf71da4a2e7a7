//! Validated directory caches
//!
//! A [`DirectoryCache`] is a [`DirectoryStore`] whose contents are tied to the
//! properties it was opened with. The properties are recorded in
//! `cache.properties`; when they no longer match, when the validator rejects
//! the contents, or when a rebuild is requested, the directory is emptied and
//! the initializer runs again.
//!
//! | Condition | Action on open |
//! |-----------|----------------|
//! | `cache.properties` missing | initialize |
//! | properties differ | initialize |
//! | validator returns false | initialize |
//! | `CacheUsage::Rebuild` (first open only) | initialize |
//! | otherwise | reuse contents |

use crate::cache::indexed::{IndexedCache, IndexedCacheParameters};
use crate::cache::lock::LOCK_FILE_NAME;
use crate::cache::options::{CacheInitializer, CacheUsage, CacheValidator, Properties};
use crate::cache::resource::{
    CacheAction, CacheBuilder, CacheSpec, PersistentCache, ReferencableCache, StoreSpec,
};
use crate::cache::store::DirectoryStore;
use crate::error::{DirCacheError, DirCacheResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of the file recording the properties a cache was initialized with
pub const PROPERTIES_FILE_NAME: &str = "cache.properties";

/// Contents of `cache.properties`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMarker {
    pub properties: Properties,
    pub initialized_at: DateTime<Utc>,
}

impl CacheMarker {
    /// Read the marker of `dir`. Unreadable markers are treated as absent.
    pub fn read(dir: &Path) -> Option<Self> {
        let path = dir.join(PROPERTIES_FILE_NAME);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(marker) => Some(marker),
            Err(e) => {
                debug!("Ignoring corrupt marker {}: {}", path.display(), e);
                None
            }
        }
    }

    fn write(&self, dir: &Path) -> DirCacheResult<()> {
        let path = dir.join(PROPERTIES_FILE_NAME);
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)
            .map_err(|e| DirCacheError::io(format!("writing {}", path.display()), e))
    }
}

/// A directory cache validated against its properties on open
pub struct DirectoryCache {
    store: DirectoryStore,
    usage: CacheUsage,
    validator: Option<Arc<dyn CacheValidator>>,
    properties: Properties,
    initializer: Option<CacheInitializer>,
    rebuilt: AtomicBool,
}

impl DirectoryCache {
    pub fn new(spec: CacheSpec) -> Self {
        Self {
            store: DirectoryStore::new(spec.dir, spec.display_name, spec.lock_options),
            usage: spec.usage,
            validator: spec.validator,
            properties: spec.properties,
            initializer: spec.initializer,
            rebuilt: AtomicBool::new(false),
        }
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    fn invalidation_reason(&self) -> Option<&'static str> {
        if self.usage == CacheUsage::Rebuild && !self.rebuilt.load(Ordering::SeqCst) {
            return Some("rebuild requested");
        }
        if let Some(validator) = &self.validator {
            if !validator.is_valid() {
                return Some("contents rejected by validator");
            }
        }
        match CacheMarker::read(self.base_dir()) {
            None => Some("not initialized"),
            Some(marker) if marker.properties != self.properties => Some("properties changed"),
            Some(_) => None,
        }
    }

    fn initialize(&self) -> DirCacheResult<()> {
        clear_dir(self.base_dir())?;
        if let Some(initializer) = &self.initializer {
            initializer(self as &dyn PersistentCache)?;
        }
        CacheMarker {
            properties: self.properties.clone(),
            initialized_at: Utc::now(),
        }
        .write(self.base_dir())?;
        self.rebuilt.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn validate(&self) -> DirCacheResult<()> {
        let Some(reason) = self.invalidation_reason() else {
            return Ok(());
        };
        debug!("{} needs initialization: {}", self.display_name(), reason);

        self.store.with_exclusive_lock(|| {
            // Another process may have initialized it while we waited.
            if let Some(reason) = self.invalidation_reason() {
                info!("Initializing {} ({})", self.store, reason);
                self.initialize()?;
            }
            Ok(())
        })
    }
}

/// Remove everything in `dir` except the lock file
fn clear_dir(dir: &Path) -> DirCacheResult<()> {
    let entries = fs::read_dir(dir)
        .map_err(|e| DirCacheError::io(format!("reading cache directory {}", dir.display()), e))?;

    for entry in entries {
        let entry =
            entry.map_err(|e| DirCacheError::io(format!("reading entry in {}", dir.display()), e))?;
        if entry.file_name() == LOCK_FILE_NAME {
            continue;
        }
        let path = entry.path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| DirCacheError::io(format!("removing {}", path.display()), e))?;
    }
    Ok(())
}

impl PersistentCache for DirectoryCache {
    fn base_dir(&self) -> &Path {
        self.store.base_dir()
    }

    fn display_name(&self) -> &str {
        self.store.display_name()
    }

    fn create_cache(&self, parameters: IndexedCacheParameters) -> DirCacheResult<IndexedCache> {
        self.store.create_cache(parameters)
    }

    fn use_cache(&self, operation: &str, action: &mut CacheAction<'_>) -> DirCacheResult<()> {
        self.store.use_cache(operation, action)
    }

    fn long_running_operation(
        &self,
        operation: &str,
        action: &mut CacheAction<'_>,
    ) -> DirCacheResult<()> {
        self.store.long_running_operation(operation, action)
    }
}

impl ReferencableCache for DirectoryCache {
    fn open(&self) -> DirCacheResult<()> {
        self.store.open()?;
        if let Err(e) = self.validate() {
            if let Err(close_err) = self.store.close() {
                warn!("Failed to close {} after failed open: {}", self.store, close_err);
            }
            return Err(e);
        }
        Ok(())
    }

    fn close(&self) -> DirCacheResult<()> {
        self.store.close()
    }
}

/// Builds [`DirectoryCache`]s and [`DirectoryStore`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCacheBuilder;

impl CacheBuilder for DefaultCacheBuilder {
    fn build_cache(&self, spec: CacheSpec) -> Arc<dyn ReferencableCache> {
        Arc::new(DirectoryCache::new(spec))
    }

    fn build_store(&self, spec: StoreSpec) -> Arc<dyn ReferencableCache> {
        Arc::new(DirectoryStore::new(
            spec.dir,
            spec.display_name,
            spec.lock_options,
        ))
    }
}
