//! Advisory file locks for cache directories
//!
//! The lock lives in `<dir>/cache.lock` and is held for as long as the
//! [`DirLock`] value is alive. The file handle is kept open to maintain it.

use crate::cache::options::LockMode;
use crate::error::{DirCacheError, DirCacheResult};
use fs4::fs_std::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the lock file inside a cache directory
pub const LOCK_FILE_NAME: &str = "cache.lock";

/// A held shared or exclusive lock on a cache directory
#[derive(Debug)]
pub struct DirLock {
    file: File,
    path: PathBuf,
    exclusive: bool,
    released: bool,
}

impl DirLock {
    /// Create `dir` if needed and block until the lock is granted.
    ///
    /// `LockMode::None` is not a lock; callers decide what it means and
    /// must not pass it here. It is treated as exclusive.
    pub fn acquire(dir: &Path, mode: LockMode) -> DirCacheResult<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            DirCacheError::io(format!("creating cache directory {}", dir.display()), e)
        })?;

        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| DirCacheError::io(format!("opening lock file {}", path.display()), e))?;

        let exclusive = !matches!(mode, LockMode::Shared);
        let locked = if exclusive {
            FileExt::lock_exclusive(&file)
        } else {
            FileExt::lock_shared(&file)
        };
        locked.map_err(|e| DirCacheError::lock(&path, e))?;

        let kind = if exclusive { "exclusive" } else { "shared" };
        debug!("Acquired {} lock on {}", kind, path.display());
        Ok(Self {
            file,
            path,
            exclusive,
            released: false,
        })
    }

    /// Convert a shared lock into an exclusive one
    pub fn upgrade(&mut self) -> DirCacheResult<()> {
        if !self.exclusive {
            FileExt::lock_exclusive(&self.file).map_err(|e| DirCacheError::lock(&self.path, e))?;
            self.exclusive = true;
        }
        Ok(())
    }

    /// Convert an exclusive lock back into a shared one
    pub fn downgrade(&mut self) -> DirCacheResult<()> {
        if self.exclusive {
            FileExt::lock_shared(&self.file).map_err(|e| DirCacheError::lock(&self.path, e))?;
            self.exclusive = false;
        }
        Ok(())
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock, reporting failures instead of logging them
    pub fn release(mut self) -> DirCacheResult<()> {
        self.unlock()
    }

    /// Unlocks on the first call only
    fn unlock(&mut self) -> DirCacheResult<()> {
        if std::mem::replace(&mut self.released, true) {
            return Ok(());
        }
        FileExt::unlock(&self.file).map_err(|e| DirCacheError::lock(&self.path, e))
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = self.unlock() {
            warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
    }
}
