//! Process-wide registry of open cache directories
//!
//! Any number of call sites may open a cache rooted at the same directory.
//! The registry keeps exactly one underlying cache per canonical directory
//! and hands every caller its own [`CacheLease`]. The cache is closed when
//! its last lease is released.
//!
//! # Sharing Rules
//!
//! | Repeat open of an open directory | Result |
//! |----------------------------------|--------|
//! | same lock options and properties | new lease on the same cache |
//! | different lock options | [`DirCacheError::OptionsConflict`] |
//! | different properties | [`DirCacheError::StateConflict`] |
//! | `Rebuild` from another session | [`DirCacheError::RebuildConflict`] |
//! | store, any options | new lease on the same store |
//! | from its own initializer or validator | [`DirCacheError::OpenInProgress`] |
//!
//! Registry calls are serialized by one process-wide gate, held across the
//! whole lookup, validate, create and register sequence of an open (including
//! the underlying `open`, which may do slow I/O) and across release-and-close.
//! The gate is re-entrant on the thread holding it, so an initializer or
//! validator may open and release other caches through the same registry.
//! Reopening the directory being opened fails with
//! [`DirCacheError::OpenInProgress`]. Scoped operations on a lease run outside
//! the gate.

mod lease;
mod request;
mod session;

pub use lease::CacheLease;
pub use request::{CacheRequest, StoreRequest};
pub use session::CacheFactory;

use crate::cache::{
    CacheBuilder, CacheUsage, DefaultCacheBuilder, LockMode, LockOptions, OnDemandCache,
    Properties, ReferencableCache,
};
use crate::error::{DirCacheError, DirCacheResult};
use crate::paths::canonicalize_dir;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use tracing::debug;
use uuid::Uuid;

/// Identifies one [`CacheFactory`] session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type LeaseId = u64;
type ReferenceId = u64;

/// Registry entry for one canonical directory
struct DirCacheReference {
    id: ReferenceId,
    dir: PathBuf,
    cache: Arc<dyn ReferencableCache>,
    properties: Properties,
    lock_options: LockOptions,
    references: HashSet<LeaseId>,
    rebuilt_by: Option<SessionId>,
}

impl DirCacheReference {
    fn new(
        id: ReferenceId,
        dir: PathBuf,
        cache: Arc<dyn ReferencableCache>,
        properties: Properties,
        lock_options: LockOptions,
    ) -> Self {
        Self {
            id,
            dir,
            cache,
            properties,
            lock_options,
            references: HashSet::new(),
            rebuilt_by: None,
        }
    }

    /// Whether `request` from `session` may share this cache
    fn check_reuse(&self, session: SessionId, request: &CacheRequest) -> DirCacheResult<()> {
        let dir = || request.dir.clone();
        if request.usage == CacheUsage::Rebuild && self.rebuilt_by != Some(session) {
            return Err(DirCacheError::RebuildConflict { dir: dir() });
        }
        if request.lock_options != self.lock_options {
            return Err(DirCacheError::OptionsConflict { dir: dir() });
        }
        if request.properties != self.properties {
            return Err(DirCacheError::StateConflict { dir: dir() });
        }
        Ok(())
    }

    fn attach(&mut self, lease: LeaseId, rebuilt_by: Option<SessionId>) -> Attachment {
        if rebuilt_by.is_some() {
            self.rebuilt_by = rebuilt_by;
        }
        self.references.insert(lease);
        Attachment {
            dir: self.dir.clone(),
            reference: self.id,
            lease,
            cache: Arc::clone(&self.cache),
        }
    }

    /// Drop `lease`; true when it was the last one
    fn release(&mut self, lease: LeaseId) -> bool {
        self.references.remove(&lease) && self.references.is_empty()
    }

    fn close(self) -> DirCacheResult<()> {
        debug!("Closing {} ({})", self.cache.display_name(), self.dir.display());
        self.cache.close()
    }
}

/// A lease's view of the reference it was attached to
struct Attachment {
    dir: PathBuf,
    reference: ReferenceId,
    lease: LeaseId,
    cache: Arc<dyn ReferencableCache>,
}

/// Registry contents; only reachable through the registry mutex
#[derive(Default)]
struct RegistryState {
    dir_caches: HashMap<PathBuf, DirCacheReference>,
    /// Directories whose cache is being opened
    busy: HashSet<PathBuf>,
    next_id: u64,
}

impl RegistryState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Keeps a directory busy until dropped
struct BusyDir<'a> {
    shared: &'a Shared,
    dir: PathBuf,
}

impl<'a> BusyDir<'a> {
    fn mark(shared: &'a Shared, state: &mut RegistryState, dir: PathBuf) -> Self {
        state.busy.insert(dir.clone());
        Self { shared, dir }
    }
}

impl Drop for BusyDir<'_> {
    fn drop(&mut self) {
        self.shared.lock_state().busy.remove(&self.dir);
    }
}

/// Mutual exclusion across threads that the holding thread may re-enter
#[derive(Default)]
struct Gate {
    /// Holding thread and how many times it entered
    holder: Mutex<Option<(ThreadId, usize)>>,
    released: Condvar,
}

impl Gate {
    fn enter(&self) -> GateGuard<'_> {
        let current = thread::current().id();
        let mut holder = self.holder.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let held = *holder;
            match held {
                None => {
                    *holder = Some((current, 1));
                    break;
                }
                Some((owner, depth)) if owner == current => {
                    *holder = Some((owner, depth + 1));
                    break;
                }
                Some(_) => {
                    holder = self
                        .released
                        .wait(holder)
                        .unwrap_or_else(PoisonError::into_inner)
                }
            }
        }
        GateGuard { gate: self }
    }
}

struct GateGuard<'a> {
    gate: &'a Gate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        let mut holder = self.gate.holder.lock().unwrap_or_else(PoisonError::into_inner);
        let held = *holder;
        *holder = match held {
            Some((owner, depth)) if depth > 1 => Some((owner, depth - 1)),
            _ => None,
        };
        if holder.is_none() {
            self.gate.released.notify_one();
        }
    }
}

struct Shared {
    /// Held for the whole of each registry call
    gate: Gate,
    /// Held only while reading or updating bookkeeping
    state: Mutex<RegistryState>,
    builder: Arc<dyn CacheBuilder>,
}

impl Shared {
    fn serialize(&self) -> GateGuard<'_> {
        self.gate.enter()
    }

    fn lock_state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the bookkeeping unless `dir` is being opened further up this
    /// thread's stack.
    fn lock_idle(
        &self,
        dir: &Path,
        requested: &Path,
    ) -> DirCacheResult<MutexGuard<'_, RegistryState>> {
        let state = self.lock_state();
        if state.busy.contains(dir) {
            return Err(DirCacheError::OpenInProgress {
                dir: requested.to_path_buf(),
            });
        }
        Ok(state)
    }

    fn open(&self, session: SessionId, request: CacheRequest) -> DirCacheResult<Attachment> {
        let dir = canonicalize_dir(&request.dir)?;
        let rebuilt_by = (request.usage == CacheUsage::Rebuild).then_some(session);

        let _gate = self.serialize();
        let mut state = self.lock_idle(&dir, &request.dir)?;
        let lease = state.next_id();
        if let Some(reference) = state.dir_caches.get_mut(&dir) {
            reference.check_reuse(session, &request)?;
            return Ok(reference.attach(lease, rebuilt_by));
        }

        let properties = request.properties.clone();
        let lock_options = request.lock_options;
        let cache: Arc<dyn ReferencableCache> = if lock_options.mode == LockMode::None {
            let exclusive = lock_options.with_mode(LockMode::Exclusive);
            let spec = request.into_spec(dir.clone(), exclusive);
            Arc::new(OnDemandCache::new(self.builder.build_cache(spec)))
        } else {
            self.builder.build_cache(request.into_spec(dir.clone(), lock_options))
        };

        let reference =
            DirCacheReference::new(state.next_id(), dir, cache, properties, lock_options);
        self.register(state, reference, lease, rebuilt_by)
    }

    /// Stores are reused regardless of the options they were opened with.
    fn open_store(&self, request: StoreRequest) -> DirCacheResult<Attachment> {
        let dir = canonicalize_dir(&request.dir)?;

        let _gate = self.serialize();
        let mut state = self.lock_idle(&dir, &request.dir)?;
        let lease = state.next_id();
        if let Some(reference) = state.dir_caches.get_mut(&dir) {
            return Ok(reference.attach(lease, None));
        }

        let lock_options = request.lock_options;
        let cache = self.builder.build_store(request.into_spec(dir.clone()));
        let reference =
            DirCacheReference::new(state.next_id(), dir, cache, Properties::new(), lock_options);
        self.register(state, reference, lease, None)
    }

    /// Open the cache of an unregistered `reference` with its directory
    /// busy, then register it.
    fn register(
        &self,
        mut state: MutexGuard<'_, RegistryState>,
        mut reference: DirCacheReference,
        lease: LeaseId,
        rebuilt_by: Option<SessionId>,
    ) -> DirCacheResult<Attachment> {
        let busy = BusyDir::mark(self, &mut state, reference.dir.clone());
        drop(state);

        reference.cache.open()?;
        debug!(
            "Registered {} ({}) with {} lock",
            reference.cache.display_name(),
            reference.dir.display(),
            reference.lock_options.mode
        );

        let attachment = reference.attach(lease, rebuilt_by);
        self.lock_state()
            .dir_caches
            .insert(reference.dir.clone(), reference);
        drop(busy);
        Ok(attachment)
    }

    /// Release `lease`, closing and unregistering its reference when it was
    /// the last one. Unknown leases are ignored.
    fn release(&self, dir: &Path, reference: ReferenceId, lease: LeaseId) -> DirCacheResult<()> {
        let _gate = self.serialize();
        let mut state = self.lock_state();
        let last = match state.dir_caches.get_mut(dir) {
            Some(entry) => entry.id == reference && entry.release(lease),
            None => false,
        };
        if !last {
            return Ok(());
        }
        // Unregister first so no new opener can attach to a closing cache.
        let entry = state.dir_caches.remove(dir);
        drop(state);
        match entry {
            Some(entry) => entry.close(),
            None => Ok(()),
        }
    }

    fn close_all(&self) -> Vec<DirCacheError> {
        let _gate = self.serialize();
        let references: Vec<DirCacheReference> = self
            .lock_state()
            .dir_caches
            .drain()
            .map(|(_, reference)| reference)
            .collect();

        references
            .into_iter()
            .filter_map(|reference| reference.close().err())
            .collect()
    }
}

/// Owner of the directory-to-cache map
///
/// Create one per process (or per test) and hand out sessions with
/// [`CacheRegistry::create`]. Clones share the same map.
#[derive(Clone)]
pub struct CacheRegistry {
    shared: Arc<Shared>,
}

impl CacheRegistry {
    pub fn new(builder: Arc<dyn CacheBuilder>) -> Self {
        Self {
            shared: Arc::new(Shared {
                gate: Gate::default(),
                state: Mutex::new(RegistryState::default()),
                builder,
            }),
        }
    }

    /// Registry building the default on-disk caches
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(DefaultCacheBuilder))
    }

    /// Start a new factory session
    pub fn create(&self) -> CacheFactory {
        CacheFactory::new(Arc::clone(&self.shared))
    }

    /// Close every cache still registered, whatever leases remain.
    ///
    /// Every cache is closed even if some fail; all failures are reported.
    pub fn close(&self) -> DirCacheResult<()> {
        let failures = self.shared.close_all();
        DirCacheError::collect(failures)
    }

    /// Number of registered directories
    pub fn len(&self) -> usize {
        self.shared.lock_state().dir_caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a cache is registered for `dir`
    pub fn is_open(&self, dir: &Path) -> bool {
        self.lease_count(dir).is_some()
    }

    /// Number of live leases on the cache registered for `dir`
    pub fn lease_count(&self, dir: &Path) -> Option<usize> {
        let dir = canonicalize_dir(dir).ok()?;
        self.shared
            .lock_state()
            .dir_caches
            .get(&dir)
            .map(|reference| reference.references.len())
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
