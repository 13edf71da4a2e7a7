//! Configuration schema for dircache
//!
//! Configuration is stored at `~/.config/dircache/config.toml`

use crate::cache::{LockMode, LockOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Cache settings
    pub cache: CacheConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Cache settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding named caches (defaults to the platform cache dir)
    pub root: Option<PathBuf>,

    /// Lock mode used when none is given on the command line
    pub lock_mode: LockMode,

    /// Share locks with other versions of the tool
    pub cross_version: bool,
}

impl CacheConfig {
    /// Directory holding named caches
    pub fn root_dir(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("dircache")
        })
    }

    /// Default lock options for opened caches
    pub fn lock_options(&self) -> LockOptions {
        LockOptions::new(self.lock_mode).cross_version(self.cross_version)
    }
}
