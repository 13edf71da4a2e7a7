//! Directory store: a locked directory with no validation of its contents

use crate::cache::indexed::{IndexedCache, IndexedCacheParameters};
use crate::cache::lock::DirLock;
use crate::cache::options::{LockMode, LockOptions};
use crate::cache::resource::{CacheAction, PersistentCache, ReferencableCache};
use crate::error::{DirCacheError, DirCacheResult};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Default)]
struct StoreState {
    open: bool,
    lock: Option<DirLock>,
}

/// A cache directory held locked between `open` and `close`
///
/// `LockMode::None` stores take no file lock at all.
pub struct DirectoryStore {
    dir: PathBuf,
    display_name: String,
    lock_options: LockOptions,
    state: Mutex<StoreState>,
    access: Mutex<()>,
}

impl DirectoryStore {
    pub fn new(dir: PathBuf, display_name: String, lock_options: LockOptions) -> Self {
        Self {
            dir,
            display_name,
            lock_options,
            state: Mutex::new(StoreState::default()),
            access: Mutex::new(()),
        }
    }

    pub fn lock_options(&self) -> LockOptions {
        self.lock_options
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    /// Run `f` with the directory locked exclusively, restoring a shared
    /// lock afterwards
    pub(crate) fn with_exclusive_lock<T>(
        &self,
        f: impl FnOnce() -> DirCacheResult<T>,
    ) -> DirCacheResult<T> {
        let was_shared = match self.state().lock.as_mut() {
            Some(lock) => {
                let was_shared = !lock.is_exclusive();
                lock.upgrade()?;
                was_shared
            }
            None => false,
        };

        // The state mutex is not held while `f` runs so it may use the cache.
        let result = f();

        if was_shared {
            if let Some(lock) = self.state().lock.as_mut() {
                lock.downgrade()?;
            }
        }
        result
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> DirCacheResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DirCacheError::CacheNotOpen {
                name: self.display_name.clone(),
            })
        }
    }
}

impl fmt::Display for DirectoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.dir.display())
    }
}

impl PersistentCache for DirectoryStore {
    fn base_dir(&self) -> &Path {
        &self.dir
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn create_cache(&self, parameters: IndexedCacheParameters) -> DirCacheResult<IndexedCache> {
        IndexedCache::open(&self.dir, parameters)
    }

    fn use_cache(&self, operation: &str, action: &mut CacheAction<'_>) -> DirCacheResult<()> {
        self.ensure_open()?;
        let _access = self.access.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("Running '{}' against {}", operation, self);
        action()
    }

    fn long_running_operation(
        &self,
        operation: &str,
        action: &mut CacheAction<'_>,
    ) -> DirCacheResult<()> {
        self.ensure_open()?;
        debug!("Running long operation '{}' against {}", operation, self);
        action()
    }
}

impl ReferencableCache for DirectoryStore {
    fn open(&self) -> DirCacheResult<()> {
        let mut state = self.state();
        if state.open {
            return Ok(());
        }

        state.lock = match self.lock_options.mode {
            LockMode::None => {
                fs::create_dir_all(&self.dir).map_err(|e| {
                    DirCacheError::io(format!("creating cache directory {}", self.dir.display()), e)
                })?;
                None
            }
            mode => Some(DirLock::acquire(&self.dir, mode)?),
        };
        state.open = true;

        debug!("Opened {} with {} lock", self, self.lock_options.mode);
        Ok(())
    }

    fn close(&self) -> DirCacheResult<()> {
        let mut state = self.state();
        if !state.open {
            return Ok(());
        }
        state.open = false;

        debug!("Closed {}", self);
        match state.lock.take() {
            Some(lock) => lock.release(),
            None => Ok(()),
        }
    }
}
