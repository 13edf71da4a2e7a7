//! Directory-backed persistent caches
//!
//! Defines the contract the registry relies on ([`PersistentCache`],
//! [`ReferencableCache`], [`CacheBuilder`]) and the default on-disk
//! implementation built by [`DefaultCacheBuilder`].
//!
//! # Lock Modes
//!
//! | Mode | Held while | Built as |
//! |------|------------|----------|
//! | Shared | open | [`DirectoryCache`] |
//! | Exclusive | open | [`DirectoryCache`] |
//! | None | each scoped operation | [`OnDemandCache`] over an exclusive [`DirectoryCache`] |

pub mod directory;
pub mod indexed;
pub mod lock;
pub mod on_demand;
pub mod options;
pub mod resource;
pub mod store;

pub use directory::{CacheMarker, DefaultCacheBuilder, DirectoryCache};
pub use indexed::{IndexedCache, IndexedCacheParameters};
pub use lock::DirLock;
pub use on_demand::OnDemandCache;
pub use options::{
    CacheInitializer, CacheUsage, CacheValidator, LockMode, LockOptions, Properties,
};
pub use resource::{
    CacheAction, CacheBuilder, CacheSpec, PersistentCache, ReferencableCache, StoreSpec,
};
pub use store::DirectoryStore;
