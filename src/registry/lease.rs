//! Per-open handles on shared caches

use super::{Attachment, LeaseId, ReferenceId, Shared};
use crate::cache::{CacheAction, IndexedCache, IndexedCacheParameters, ReferencableCache};
use crate::error::{DirCacheError, DirCacheResult};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Lease state shared between the caller's handle and the issuing session
pub(super) struct LeaseInner {
    id: LeaseId,
    dir: PathBuf,
    reference: ReferenceId,
    cache: Arc<dyn ReferencableCache>,
    registry: Arc<Shared>,
    released: AtomicBool,
}

impl LeaseInner {
    pub(super) fn new(attachment: Attachment, registry: Arc<Shared>) -> Self {
        Self {
            id: attachment.lease,
            dir: attachment.dir,
            reference: attachment.reference,
            cache: attachment.cache,
            registry,
            released: AtomicBool::new(false),
        }
    }

    /// Only the first call decrements the reference count.
    pub(super) fn release(&self) -> DirCacheResult<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Releasing lease {} on {}", self.id, self.dir.display());
        self.registry.release(&self.dir, self.reference, self.id)
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// A caller's handle on a shared cache
///
/// Every successful open returns a new lease, even when the directory is
/// already open. Leases forward all cache operations to the shared cache;
/// closing (or dropping) the last lease on a directory closes the cache.
///
/// Callers must not close a lease while a scoped operation on it is running
/// on another thread.
pub struct CacheLease {
    inner: Arc<LeaseInner>,
}

impl CacheLease {
    pub(super) fn new(inner: Arc<LeaseInner>) -> Self {
        Self { inner }
    }

    /// Canonical directory of the cache
    pub fn base_dir(&self) -> &Path {
        self.inner.cache.base_dir()
    }

    pub fn display_name(&self) -> &str {
        self.inner.cache.display_name()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_released()
    }

    pub fn create_cache(&self, parameters: IndexedCacheParameters) -> DirCacheResult<IndexedCache> {
        self.cache()?.create_cache(parameters)
    }

    /// Run `action` with exclusive, validated access to the cache contents
    pub fn use_cache<T>(
        &self,
        operation: &str,
        action: impl FnOnce() -> DirCacheResult<T>,
    ) -> DirCacheResult<T> {
        self.run_scoped(operation, action, |cache, scoped| {
            cache.use_cache(operation, scoped)
        })
    }

    /// Run a slow `action` without holding up other users of the cache
    pub fn long_running_operation<T>(
        &self,
        operation: &str,
        action: impl FnOnce() -> DirCacheResult<T>,
    ) -> DirCacheResult<T> {
        self.run_scoped(operation, action, |cache, scoped| {
            cache.long_running_operation(operation, scoped)
        })
    }

    /// Release this lease. Only the first call has an effect.
    pub fn close(&self) -> DirCacheResult<()> {
        self.inner.release()
    }

    fn cache(&self) -> DirCacheResult<&dyn ReferencableCache> {
        if self.inner.is_released() {
            return Err(DirCacheError::LeaseClosed {
                dir: self.inner.dir.clone(),
            });
        }
        Ok(self.inner.cache.as_ref())
    }

    fn run_scoped<T, A, F>(&self, operation: &str, action: A, forward: F) -> DirCacheResult<T>
    where
        A: FnOnce() -> DirCacheResult<T>,
        F: FnOnce(&dyn ReferencableCache, &mut CacheAction<'_>) -> DirCacheResult<()>,
    {
        let cache = self.cache()?;
        let mut action = Some(action);
        let mut output = None;

        let scoped: &mut CacheAction<'_> = &mut || {
            if let Some(action) = action.take() {
                output = Some(action()?);
            }
            Ok(())
        };
        forward(cache, scoped)?;

        output.ok_or_else(|| {
            DirCacheError::Internal(format!("{} did not run '{}'", self, operation))
        })
    }
}

impl fmt::Display for CacheLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl fmt::Debug for CacheLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheLease")
            .field("id", &self.inner.id)
            .field("dir", &self.inner.dir)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for CacheLease {
    fn drop(&mut self) {
        if let Err(e) = self.inner.release() {
            warn!("Failed to release {}: {}", self.inner.dir.display(), e);
        }
    }
}
