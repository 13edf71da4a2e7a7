//! Contract between the registry and the caches it shares
//!
//! The registry never looks inside a cache. It constructs one through a
//! [`CacheBuilder`], opens and closes it through [`ReferencableCache`], and
//! hands callers leases that forward the [`PersistentCache`] operations.

use crate::cache::indexed::{IndexedCache, IndexedCacheParameters};
use crate::cache::options::{CacheInitializer, CacheUsage, CacheValidator, LockOptions, Properties};
use crate::error::DirCacheResult;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Scoped action run against a cache's contents
pub type CacheAction<'a> = dyn FnMut() -> DirCacheResult<()> + 'a;

/// A directory-backed cache as seen by its users
pub trait PersistentCache: Send + Sync {
    /// Directory holding the cache contents
    fn base_dir(&self) -> &Path;

    /// Human-readable name used in logs and errors
    fn display_name(&self) -> &str;

    /// Create a named key/value sub-cache inside this cache
    fn create_cache(&self, parameters: IndexedCacheParameters) -> DirCacheResult<IndexedCache>;

    /// Run `action` while the cache contents are guaranteed valid and
    /// mutually exclusive with other `use_cache` actions
    fn use_cache(&self, operation: &str, action: &mut CacheAction<'_>) -> DirCacheResult<()>;

    /// Run a potentially slow `action` without blocking other users of the cache
    fn long_running_operation(
        &self,
        operation: &str,
        action: &mut CacheAction<'_>,
    ) -> DirCacheResult<()>;
}

/// A cache whose underlying resources are acquired by `open` and released by `close`
pub trait ReferencableCache: PersistentCache {
    fn open(&self) -> DirCacheResult<()>;

    fn close(&self) -> DirCacheResult<()>;
}

/// Everything needed to construct a general cache
#[derive(Clone)]
pub struct CacheSpec {
    /// Canonical cache directory
    pub dir: PathBuf,
    pub display_name: String,
    pub usage: CacheUsage,
    pub validator: Option<Arc<dyn CacheValidator>>,
    pub properties: Properties,
    pub lock_options: LockOptions,
    pub initializer: Option<CacheInitializer>,
}

/// Everything needed to construct a store
#[derive(Debug, Clone)]
pub struct StoreSpec {
    /// Canonical store directory
    pub dir: PathBuf,
    pub display_name: String,
    pub lock_options: LockOptions,
}

/// Constructs (but does not open) the caches the registry shares
pub trait CacheBuilder: Send + Sync {
    fn build_cache(&self, spec: CacheSpec) -> Arc<dyn ReferencableCache>;

    fn build_store(&self, spec: StoreSpec) -> Arc<dyn ReferencableCache>;
}
