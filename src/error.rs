//! Error types for dircache
//!
//! All modules use `DirCacheResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for dircache operations
pub type DirCacheResult<T> = Result<T, DirCacheError>;

/// All errors that can occur in dircache
#[derive(Error, Debug)]
pub enum DirCacheError {
    // Registry errors
    #[error("Cannot rebuild cache '{}' as it is already open.", .dir.display())]
    RebuildConflict { dir: PathBuf },

    #[error("Cache '{}' is already open with different options.", .dir.display())]
    OptionsConflict { dir: PathBuf },

    #[error("Cache '{}' is already open with different state.", .dir.display())]
    StateConflict { dir: PathBuf },

    #[error("Cache '{}' is already being opened by this thread.", .dir.display())]
    OpenInProgress { dir: PathBuf },

    #[error("Initializer actions are not currently supported by the directory store implementation.")]
    UnsupportedInitializer,

    #[error("Cache lease for '{}' has already been closed", .dir.display())]
    LeaseClosed { dir: PathBuf },

    #[error("{} cache(s) failed to close: {}", .0.len(), summarize(.0))]
    CloseFailures(Vec<DirCacheError>),

    // Cache errors
    #[error("Cache {name} is not open")]
    CacheNotOpen { name: String },

    #[error("Failed to lock {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("Invalid configuration at {}: {reason}", .path.display())]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {}: {source}", .path.display())]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

fn summarize(errors: &[DirCacheError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl DirCacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a lock error for the given lock file
    pub fn lock(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Lock {
            path: path.into(),
            source,
        }
    }

    /// Fold the failures of a bulk close into a single result
    pub fn collect(mut failures: Vec<DirCacheError>) -> DirCacheResult<()> {
        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0)),
            _ => Err(Self::CloseFailures(failures)),
        }
    }

    /// Whether the error was caused by reopening a directory that is already
    /// open with an incompatible configuration
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::RebuildConflict { .. } | Self::OptionsConflict { .. } | Self::StateConflict { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::RebuildConflict { .. } => {
                Some("Close the other users of this cache before rebuilding it")
            }
            Self::OptionsConflict { .. } | Self::StateConflict { .. } => {
                Some("Open the cache with the same lock mode and properties as its current users")
            }
            Self::OpenInProgress { .. } => {
                Some("An initializer or validator must not reopen the cache it is preparing")
            }
            Self::Lock { .. } => Some("Another process may be holding the cache lock"),
            Self::ConfigInvalid { .. } => Some("Run: dircache config init --force"),
            _ => None,
        }
    }
}
