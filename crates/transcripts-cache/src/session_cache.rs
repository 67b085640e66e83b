//! Per-file disk cache: one entry per `(provider, source_path)`, validated by
//! `(mtime_ns, size)` so an unmodified transcript is never re-parsed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use transcripts_providers::PerFileCache;
use transcripts_types::SessionRecord;

use crate::dirs::{atomic_write, path_fingerprint};
use crate::error::Result;

const SESSION_CACHE_VERSION: u32 = 1;
const SESSION_CACHE_FILENAME: &str = "session_cache.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    provider: String,
    source_path: String,
    mtime_ns: i128,
    size: u64,
    session: SessionRecord,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachePayload {
    version: u32,
    updated_at: chrono::DateTime<Utc>,
    entries: Vec<CacheEntry>,
}

/// Disk-backed per-file session cache. `enabled` flips permanently false the
/// first time a persist fails, so a process on a read-only filesystem
/// degrades to in-memory-only rather than hot-looping on write errors.
pub struct DiskSessionCache {
    cache_dir: PathBuf,
    enabled: std::sync::atomic::AtomicBool,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

fn entry_key(provider: &str, path: &str) -> String {
    format!("{provider}::{path}")
}

impl DiskSessionCache {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            enabled: std::sync::atomic::AtomicBool::new(true),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// `AGENT_SESSIONS_CACHE_DIR`, else the platform default cache directory,
    /// else an in-memory-only cache with no directory to persist to.
    pub fn from_env() -> Self {
        if crate::dirs::cache_disabled() {
            let cache = Self::new(PathBuf::new());
            cache.enabled.store(false, std::sync::atomic::Ordering::Relaxed);
            return cache;
        }
        let dir = crate::dirs::cache_dir_from_env()
            .or_else(crate::dirs::default_cache_dir)
            .unwrap_or_default();
        Self::new(dir)
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn session_cache_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_CACHE_FILENAME)
    }

    /// Read the on-disk payload into memory. Missing, malformed, or
    /// version-mismatched files are silently treated as empty — this cache
    /// tier is purely an optimization, never a source of truth.
    pub fn load(&self) {
        if !self.enabled() {
            return;
        }
        let Ok(raw) = std::fs::read_to_string(self.session_cache_path()) else {
            return;
        };
        let Ok(payload) = serde_json::from_str::<CachePayload>(&raw) else {
            tracing::debug!(path = %self.session_cache_path().display(), "discarding malformed session cache");
            return;
        };
        if payload.version != SESSION_CACHE_VERSION {
            return;
        }
        let mut entries = self.entries.write().expect("session cache poisoned");
        for entry in payload.entries {
            let key = entry_key(&entry.provider, &entry.source_path);
            entries.insert(key, entry);
        }
    }

    pub fn lookup(&self, provider: &str, path: &Path) -> Option<SessionRecord> {
        let Some((mtime_ns, size)) = path_fingerprint(path) else {
            tracing::debug!(path = %path.display(), "unable to stat path for cache lookup");
            return None;
        };
        let key = entry_key(provider, &path.to_string_lossy());
        let entries = self.entries.read().expect("session cache poisoned");
        let entry = entries.get(&key)?;
        if entry.mtime_ns == mtime_ns && entry.size == size {
            Some(entry.session.clone())
        } else {
            None
        }
    }

    pub fn store(&self, provider: &str, path: &Path, record: &SessionRecord) {
        let Some((mtime_ns, size)) = path_fingerprint(path) else {
            tracing::debug!(path = %path.display(), "unable to stat path for cache store");
            return;
        };
        let key = entry_key(provider, &path.to_string_lossy());
        let entry = CacheEntry {
            provider: provider.to_string(),
            source_path: path.to_string_lossy().into_owned(),
            mtime_ns,
            size,
            session: record.clone(),
        };
        let mut entries = self.entries.write().expect("session cache poisoned");
        entries.insert(key, entry);
    }

    /// Atomic write of the whole in-memory payload. On any I/O failure the
    /// cache disables itself for the rest of the process but keeps serving
    /// its in-memory content.
    pub fn persist(&self) -> Result<()> {
        if !self.enabled() || self.cache_dir.as_os_str().is_empty() {
            return Ok(());
        }
        let entries: Vec<CacheEntry> = self
            .entries
            .read()
            .expect("session cache poisoned")
            .values()
            .cloned()
            .collect();
        let payload = CachePayload {
            version: SESSION_CACHE_VERSION,
            updated_at: Utc::now(),
            entries,
        };
        let serialized = serde_json::to_vec_pretty(&payload)?;
        if let Err(err) = atomic_write(&self.session_cache_path(), &serialized) {
            tracing::debug!(error = %err, "session cache persist failed, disabling disk cache");
            self.enabled.store(false, std::sync::atomic::Ordering::Relaxed);
            return Err(err.into());
        }
        Ok(())
    }
}

impl PerFileCache for DiskSessionCache {
    fn lookup(&self, provider: &str, path: &Path) -> Option<SessionRecord> {
        DiskSessionCache::lookup(self, provider, path)
    }

    fn store(&self, provider: &str, path: &Path, record: &SessionRecord) {
        DiskSessionCache::store(self, provider, path, record)
    }
}
