//! Caches that are only held open while they are being used
//!
//! Callers asking for `LockMode::None` still get an exclusively locked
//! cache, but the lock is taken around each scoped operation and released
//! before it returns, instead of being held for as long as the cache is
//! registered.

use crate::cache::indexed::{IndexedCache, IndexedCacheParameters};
use crate::cache::resource::{CacheAction, PersistentCache, ReferencableCache};
use crate::error::DirCacheResult;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Opens its delegate around every `use_cache`/`long_running_operation` call
pub struct OnDemandCache {
    delegate: Arc<dyn ReferencableCache>,
    /// Serializes scoped operations; the delegate can only be open once.
    in_use: Mutex<()>,
}

impl OnDemandCache {
    /// Wrap a cache built with `LockMode::Exclusive`
    pub fn new(delegate: Arc<dyn ReferencableCache>) -> Self {
        Self {
            delegate,
            in_use: Mutex::new(()),
        }
    }

    fn with_delegate_open(
        &self,
        run: impl FnOnce(&dyn ReferencableCache) -> DirCacheResult<()>,
    ) -> DirCacheResult<()> {
        let _in_use = self.in_use.lock().unwrap_or_else(PoisonError::into_inner);

        self.delegate.open()?;
        let outcome = run(self.delegate.as_ref());
        let closed = self.delegate.close();
        outcome.and(closed)
    }
}

impl PersistentCache for OnDemandCache {
    fn base_dir(&self) -> &Path {
        self.delegate.base_dir()
    }

    fn display_name(&self) -> &str {
        self.delegate.display_name()
    }

    fn create_cache(&self, parameters: IndexedCacheParameters) -> DirCacheResult<IndexedCache> {
        self.delegate.create_cache(parameters)
    }

    fn use_cache(&self, operation: &str, action: &mut CacheAction<'_>) -> DirCacheResult<()> {
        self.with_delegate_open(|delegate| delegate.use_cache(operation, action))
    }

    fn long_running_operation(
        &self,
        operation: &str,
        action: &mut CacheAction<'_>,
    ) -> DirCacheResult<()> {
        self.with_delegate_open(|delegate| delegate.long_running_operation(operation, action))
    }
}

impl ReferencableCache for OnDemandCache {
    fn open(&self) -> DirCacheResult<()> {
        debug!("{} opens on demand", self.display_name());
        Ok(())
    }

    fn close(&self) -> DirCacheResult<()> {
        debug!("{} closed on demand", self.display_name());
        Ok(())
    }
}
