//! Canonical directory keys
//!
//! Distinct textual paths naming the same directory must map to one registry
//! entry, including directories that do not exist yet.

use crate::error::{DirCacheError, DirCacheResult};
use std::path::{Component, Path, PathBuf};

/// Resolve `dir` to an absolute path with symlinks and `.`/`..` segments resolved.
///
/// Components are resolved left to right against the filesystem, so a `..`
/// following a symlink leaves the symlink's target, not the link. Components
/// that do not exist yet are appended as written.
pub fn canonicalize_dir(dir: &Path) -> DirCacheResult<PathBuf> {
    let absolute = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| DirCacheError::io("getting current directory", e))?
            .join(dir)
    };

    if let Ok(resolved) = absolute.canonicalize() {
        return Ok(resolved);
    }

    let mut resolved = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                let candidate = resolved.join(name);
                resolved = if candidate.exists() {
                    candidate.canonicalize().map_err(|e| {
                        DirCacheError::io(format!("canonicalizing {}", dir.display()), e)
                    })?
                } else {
                    candidate
                };
            }
        }
    }
    Ok(resolved)
}
