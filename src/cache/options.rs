//! Cache configuration: lock options, usage, properties and callbacks

use crate::cache::resource::PersistentCache;
use crate::error::DirCacheResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Property mapping a cache was opened with. Compared by value.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// How a cache directory is locked while open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// Locked exclusively, but only for the duration of each scoped operation
    None,
    /// Shared lock held while open
    #[default]
    Shared,
    /// Exclusive lock held while open
    Exclusive,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Shared => "shared",
            Self::Exclusive => "exclusive",
        };
        write!(f, "{}", name)
    }
}

/// Lock mode plus mode-specific settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockOptions {
    pub mode: LockMode,
    /// Lock is shared with other versions of the tool using the same directory
    pub cross_version: bool,
}

impl LockOptions {
    pub fn new(mode: LockMode) -> Self {
        Self {
            mode,
            cross_version: false,
        }
    }

    /// Same options with a different mode
    pub fn with_mode(self, mode: LockMode) -> Self {
        Self { mode, ..self }
    }

    pub fn cross_version(self, cross_version: bool) -> Self {
        Self {
            cross_version,
            ..self
        }
    }
}

/// Whether the cache may be reused or must be rebuilt on open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheUsage {
    #[default]
    Normal,
    Rebuild,
}

/// Decides whether the on-disk contents of a cache can be reused
pub trait CacheValidator: Send + Sync {
    fn is_valid(&self) -> bool;
}

impl<F> CacheValidator for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_valid(&self) -> bool {
        self()
    }
}

/// First-time setup run against a freshly (re)initialized cache
pub type CacheInitializer = Arc<dyn Fn(&dyn PersistentCache) -> DirCacheResult<()> + Send + Sync>;
