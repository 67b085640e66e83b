//! Two-tier disk cache: a per-file session cache validated by `(mtime_ns,
//! size)`, and an aggregate metadata snapshot cache validated by a cache key
//! plus content manifest hash, tried across a fallback chain of directories.

pub mod dirs;
mod error;
mod metadata_cache;
mod session_cache;

pub use error::{Error, Result};
pub use metadata_cache::{
    AttemptOutcome, CachedMetadataSnapshot, LoadAttempt, LoadResult, LoadStatus, MetadataCache,
    PersistResult, PersistStatus, METADATA_CACHE_VERSION, METADATA_SCHEMA_VERSION,
};
pub use session_cache::DiskSessionCache;
