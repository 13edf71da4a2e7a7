//! Open requests for caches and stores

use crate::cache::{
    CacheInitializer, CacheSpec, CacheUsage, CacheValidator, LockMode, LockOptions,
    PersistentCache, Properties, StoreSpec,
};
use crate::error::DirCacheResult;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Parameters of [`CacheFactory::open`](crate::registry::CacheFactory::open)
///
/// ```no_run
/// use dircache::cache::{CacheUsage, LockMode};
/// use dircache::registry::CacheRequest;
///
/// let request = CacheRequest::new("/var/cache/tool/hashes")
///     .display_name("file hash cache")
///     .usage(CacheUsage::Normal)
///     .lock_mode(LockMode::None)
///     .property("version", 3);
/// ```
#[derive(Clone)]
pub struct CacheRequest {
    pub(crate) dir: PathBuf,
    pub(crate) display_name: Option<String>,
    pub(crate) usage: CacheUsage,
    pub(crate) validator: Option<Arc<dyn CacheValidator>>,
    pub(crate) properties: Properties,
    pub(crate) lock_options: LockOptions,
    pub(crate) initializer: Option<CacheInitializer>,
}

impl CacheRequest {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            display_name: None,
            usage: CacheUsage::Normal,
            validator: None,
            properties: Properties::new(),
            lock_options: LockOptions::default(),
            initializer: None,
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn usage(mut self, usage: CacheUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Check run on open against existing contents; see [`Self::initializer`]
    /// for what it may do with the registry.
    pub fn validator(mut self, validator: impl CacheValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Replace all properties
    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn lock_options(mut self, lock_options: LockOptions) -> Self {
        self.lock_options = lock_options;
        self
    }

    pub fn lock_mode(mut self, mode: LockMode) -> Self {
        self.lock_options = self.lock_options.with_mode(mode);
        self
    }

    /// Setup to run when the cache is created or rebuilt on disk
    ///
    /// Runs on the opening thread while the directory is marked busy in the
    /// registry. It may open and release other caches, but opening this
    /// directory again from it fails with
    /// [`DirCacheError::OpenInProgress`](crate::error::DirCacheError::OpenInProgress).
    pub fn initializer<F>(mut self, initializer: F) -> Self
    where
        F: Fn(&dyn PersistentCache) -> DirCacheResult<()> + Send + Sync + 'static,
    {
        self.initializer = Some(Arc::new(initializer));
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Spec for the cache to build at `dir` with `lock_options`
    pub(crate) fn into_spec(self, dir: PathBuf, lock_options: LockOptions) -> CacheSpec {
        CacheSpec {
            display_name: self
                .display_name
                .unwrap_or_else(|| default_display_name("cache", &dir)),
            dir,
            usage: self.usage,
            validator: self.validator,
            properties: self.properties,
            lock_options,
            initializer: self.initializer,
        }
    }
}

/// Parameters of [`CacheFactory::open_store`](crate::registry::CacheFactory::open_store)
#[derive(Clone)]
pub struct StoreRequest {
    pub(crate) dir: PathBuf,
    pub(crate) display_name: Option<String>,
    pub(crate) lock_options: LockOptions,
    pub(crate) initializer: Option<CacheInitializer>,
}

impl StoreRequest {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            display_name: None,
            lock_options: LockOptions::default(),
            initializer: None,
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn lock_options(mut self, lock_options: LockOptions) -> Self {
        self.lock_options = lock_options;
        self
    }

    pub fn lock_mode(mut self, mode: LockMode) -> Self {
        self.lock_options = self.lock_options.with_mode(mode);
        self
    }

    /// Stores do not support initializers; opening a request that has one fails.
    pub fn initializer<F>(mut self, initializer: F) -> Self
    where
        F: Fn(&dyn PersistentCache) -> DirCacheResult<()> + Send + Sync + 'static,
    {
        self.initializer = Some(Arc::new(initializer));
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn has_initializer(&self) -> bool {
        self.initializer.is_some()
    }

    pub(crate) fn into_spec(self, dir: PathBuf) -> StoreSpec {
        StoreSpec {
            display_name: self
                .display_name
                .unwrap_or_else(|| default_display_name("store", &dir)),
            dir,
            lock_options: self.lock_options,
        }
    }
}

fn default_display_name(kind: &str, dir: &Path) -> String {
    match dir.file_name() {
        Some(name) => format!("{} {}", kind, name.to_string_lossy()),
        None => format!("{} {}", kind, dir.display()),
    }
}
