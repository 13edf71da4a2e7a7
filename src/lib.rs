//! dircache - shared, file-locked directory caches
//!
//! Many call sites in one process may open a cache rooted at the same
//! directory. A [`CacheRegistry`] keeps one underlying cache per canonical
//! directory, hands each caller a reference-counted [`CacheLease`], and
//! closes the cache when the last lease goes away.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod paths;
pub mod registry;

pub use error::{DirCacheError, DirCacheResult};
pub use registry::{CacheFactory, CacheLease, CacheRegistry, CacheRequest, StoreRequest};
