//! Concrete transcript providers: filesystem discovery and event-to-record
//! ingestion for Codex, Claude Code, and Gemini CLI session logs.

pub mod claude;
pub mod codex;
mod error;
pub mod gemini;
mod ingest;

pub use error::{Error, Result};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use transcripts_types::SessionRecord;

/// Hook a provider can consult for per-file session caching.
///
/// Implemented by `transcripts-cache`'s disk-backed cache; kept as a trait
/// here so this crate never needs to depend on the cache crate.
pub trait PerFileCache: Send + Sync {
    fn lookup(&self, provider: &str, path: &Path) -> Option<SessionRecord>;
    fn store(&self, provider: &str, path: &Path, record: &SessionRecord);
}

/// A transcript source: enumerates session files, normalizes their events,
/// and builds [`SessionRecord`]s.
pub trait Provider: Send + Sync {
    /// Stable identifier used as `SessionRecord::provider` and as a cache
    /// key component (e.g. "codex", "claude-code", "gemini-cli").
    fn name(&self) -> &'static str;

    /// Root directory this provider reads transcripts from.
    fn base_dir(&self) -> &Path;

    /// Environment variable that overrides the default base directory, if
    /// any (used by cache-key computation to capture configuration).
    fn env_var(&self) -> Option<&'static str>;

    /// Paths whose `(mtime_ns, size)` define cache freshness for this
    /// provider. Defaults to every session source path.
    fn cache_validation_paths(&self) -> Vec<PathBuf> {
        self.session_paths()
    }

    /// Paths considered for session ingestion.
    fn session_paths(&self) -> Vec<PathBuf>;

    /// Enumerate every session this provider can currently see.
    fn sessions(&self) -> Vec<SessionRecord>;

    /// Optional fast path for opening one session directly, bypassing a
    /// full enumeration. Returns `None` when the provider has no such
    /// shortcut or the path/session_id do not resolve.
    fn load_session_from_source_path(
        &self,
        _source_path: &Path,
        _session_id: Option<&str>,
    ) -> Option<SessionRecord> {
        None
    }

    /// Attach (or detach, with `None`) a per-file cache this provider may
    /// consult while building sessions.
    fn attach_cache(&mut self, cache: Option<Arc<dyn PerFileCache>>);
}

fn sort_by_recency(records: &mut [SessionRecord]) {
    records.sort_by(|a, b| {
        let key = |r: &SessionRecord| r.updated_at.or(r.started_at);
        key(b).cmp(&key(a))
    });
}
