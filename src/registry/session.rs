//! Factory sessions: the public face of the registry

use super::lease::LeaseInner;
use super::{Attachment, SessionId, Shared};
use crate::error::{DirCacheError, DirCacheResult};
use crate::registry::{CacheLease, CacheRequest, StoreRequest};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::debug;

/// One session on a [`CacheRegistry`](super::CacheRegistry)
///
/// Each call runs as a single critical section on the registry gate. The
/// session remembers the leases it issued so [`CacheFactory::close`] can
/// release whichever of them are still live.
pub struct CacheFactory {
    id: SessionId,
    registry: Arc<Shared>,
    leases: Mutex<Vec<Weak<LeaseInner>>>,
}

impl CacheFactory {
    pub(super) fn new(registry: Arc<Shared>) -> Self {
        Self {
            id: SessionId::new(),
            registry,
            leases: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Open the cache at `request.dir`, sharing it if it is already open
    ///
    /// Fails when the directory is already open with different lock options
    /// or properties, or when another session asks to rebuild it while open.
    ///
    /// Opening a directory from its own initializer or validator fails with
    /// [`DirCacheError::OpenInProgress`].
    pub fn open(&self, request: CacheRequest) -> DirCacheResult<CacheLease> {
        let _gate = self.registry.serialize();
        let attachment = self.registry.open(self.id, request)?;
        Ok(self.track(attachment))
    }

    /// Open the store at `request.dir`, sharing it if it is already open
    pub fn open_store(&self, request: StoreRequest) -> DirCacheResult<CacheLease> {
        if request.has_initializer() {
            return Err(DirCacheError::UnsupportedInitializer);
        }
        let _gate = self.registry.serialize();
        let attachment = self.registry.open_store(request)?;
        Ok(self.track(attachment))
    }

    /// Release every lease this session issued that is still live.
    ///
    /// Every lease is released even if closing some caches fails; all
    /// failures are reported.
    pub fn close(&self) -> DirCacheResult<()> {
        let _gate = self.registry.serialize();
        let leases = std::mem::take(&mut *self.leases());
        debug!("Closing session {} ({} leases)", self.id, leases.len());

        let failures = leases
            .iter()
            .filter_map(Weak::upgrade)
            .filter_map(|lease| lease.release().err())
            .collect();
        DirCacheError::collect(failures)
    }

    fn track(&self, attachment: Attachment) -> CacheLease {
        let inner = Arc::new(LeaseInner::new(attachment, Arc::clone(&self.registry)));

        let mut leases = self.leases();
        leases.retain(|lease| lease.strong_count() > 0);
        leases.push(Arc::downgrade(&inner));

        CacheLease::new(inner)
    }

    fn leases(&self) -> MutexGuard<'_, Vec<Weak<LeaseInner>>> {
        self.leases.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
