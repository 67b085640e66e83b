//! Aggregate snapshot cache: the whole session list plus the manifest that
//! produced it, tried across a fallback chain of candidate directories so a
//! read-only home cache doesn't strand a project-local workspace.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use transcripts_types::{Manifest, SessionRecord};

use crate::dirs::{atomic_write, metadata_cache_dir_candidates};

pub const METADATA_CACHE_VERSION: u32 = 1;
pub const METADATA_SCHEMA_VERSION: u32 = 1;
const METADATA_SNAPSHOT_FILENAME: &str = "metadata_snapshot.json";

/// Outcome of one candidate-directory attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Hit,
    Miss,
    Invalid,
    Error,
}

#[derive(Debug, Clone)]
pub struct LoadAttempt {
    pub dir: PathBuf,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
}

/// Overall status of a [`MetadataCache::load`] call, matching the per-call
/// telemetry taxonomy: a hit on the first candidate is preferred outright; a
/// hit further down promotes that directory for subsequent persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Hit,
    FallbackHit,
    FallbackFail,
    Miss,
}

#[derive(Debug, Clone)]
pub struct LoadResult {
    pub status: LoadStatus,
    pub snapshot: Option<CachedMetadataSnapshot>,
    pub attempts: Vec<LoadAttempt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistStatus {
    Hit,
    FallbackHit,
    WriteFail,
}

#[derive(Debug, Clone)]
pub struct PersistResult {
    pub status: PersistStatus,
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedMetadataSnapshot {
    pub cache_key: String,
    pub manifest_hash: String,
    pub manifest: Manifest,
    pub sessions: Vec<SessionRecord>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotPayload {
    version: u32,
    schema_version: u32,
    updated_at: DateTime<Utc>,
    cache_key: String,
    manifest_hash: String,
    manifest: Manifest,
    sessions: Vec<SessionRecord>,
}

/// The metadata snapshot cache. `selected_dir` is promoted to the directory a
/// `fallback_hit` was found in, so subsequent persists prefer it over the
/// nominal primary candidate.
pub struct MetadataCache {
    candidates: Vec<PathBuf>,
    enabled: std::sync::atomic::AtomicBool,
    selected_dir: std::sync::Mutex<Option<PathBuf>>,
}

impl MetadataCache {
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self {
            candidates,
            enabled: std::sync::atomic::AtomicBool::new(true),
            selected_dir: std::sync::Mutex::new(None),
        }
    }

    pub fn from_env() -> Self {
        Self::new(metadata_cache_dir_candidates())
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn snapshot_path(dir: &std::path::Path) -> PathBuf {
        dir.join(METADATA_SNAPSHOT_FILENAME)
    }

    fn read_one(&self, dir: &std::path::Path, cache_key: &str) -> (AttemptOutcome, Option<String>, Option<CachedMetadataSnapshot>) {
        let path = Self::snapshot_path(dir);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return (AttemptOutcome::Miss, None, None);
            }
            Err(err) => return (AttemptOutcome::Error, Some(err.to_string()), None),
        };
        let payload: SnapshotPayload = match serde_json::from_str(&raw) {
            Ok(payload) => payload,
            Err(err) => return (AttemptOutcome::Invalid, Some(err.to_string()), None),
        };
        if payload.version != METADATA_CACHE_VERSION
            || payload.schema_version != METADATA_SCHEMA_VERSION
            || payload.cache_key != cache_key
        {
            return (AttemptOutcome::Miss, None, None);
        }
        (
            AttemptOutcome::Hit,
            None,
            Some(CachedMetadataSnapshot {
                cache_key: payload.cache_key,
                manifest_hash: payload.manifest_hash,
                manifest: payload.manifest,
                sessions: payload.sessions,
                updated_at: payload.updated_at,
            }),
        )
    }

    pub fn load(&self, cache_key: &str) -> LoadResult {
        let mut attempts = Vec::new();
        let mut saw_failure = false;

        for (index, dir) in self.candidates.iter().enumerate() {
            let (outcome, error, snapshot) = self.read_one(dir, cache_key);
            attempts.push(LoadAttempt {
                dir: dir.clone(),
                outcome,
                error,
            });

            if outcome == AttemptOutcome::Hit {
                let status = if index == 0 {
                    LoadStatus::Hit
                } else {
                    *self.selected_dir.lock().expect("metadata cache poisoned") = Some(dir.clone());
                    LoadStatus::FallbackHit
                };
                return LoadResult {
                    status,
                    snapshot,
                    attempts,
                };
            }
            if matches!(outcome, AttemptOutcome::Invalid | AttemptOutcome::Error) {
                saw_failure = true;
            }
        }

        LoadResult {
            status: if saw_failure {
                LoadStatus::FallbackFail
            } else {
                LoadStatus::Miss
            },
            snapshot: None,
            attempts,
        }
    }

    /// Write to the first writable candidate, preferring a directory a prior
    /// `load` promoted via `fallback_hit`. All candidates failing disables
    /// the cache for the process lifetime to avoid a hot write loop.
    pub fn persist(&self, snapshot: &CachedMetadataSnapshot) -> PersistResult {
        if !self.enabled() {
            return PersistResult {
                status: PersistStatus::WriteFail,
                dir: None,
            };
        }

        let payload = SnapshotPayload {
            version: METADATA_CACHE_VERSION,
            schema_version: METADATA_SCHEMA_VERSION,
            updated_at: snapshot.updated_at,
            cache_key: snapshot.cache_key.clone(),
            manifest_hash: snapshot.manifest_hash.clone(),
            manifest: snapshot.manifest.clone(),
            sessions: snapshot.sessions.clone(),
        };
        let Ok(serialized) = serde_json::to_vec_pretty(&payload) else {
            return PersistResult {
                status: PersistStatus::WriteFail,
                dir: None,
            };
        };

        let preferred = self.selected_dir.lock().expect("metadata cache poisoned").clone();
        let ordered: Vec<&PathBuf> = preferred
            .as_ref()
            .into_iter()
            .chain(self.candidates.iter())
            .collect();

        for (index, dir) in ordered.iter().enumerate() {
            if atomic_write(&Self::snapshot_path(dir), &serialized).is_ok() {
                *self.selected_dir.lock().expect("metadata cache poisoned") = Some((*dir).clone());
                return PersistResult {
                    status: if index == 0 && preferred.is_none() {
                        PersistStatus::Hit
                    } else {
                        PersistStatus::FallbackHit
                    },
                    dir: Some((*dir).clone()),
                };
            }
        }

        tracing::debug!("metadata snapshot persist failed on every candidate directory");
        self.enabled.store(false, std::sync::atomic::Ordering::Relaxed);
        PersistResult {
            status: PersistStatus::WriteFail,
            dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transcripts_types::ManifestEntry;

    fn snapshot(cache_key: &str) -> CachedMetadataSnapshot {
        CachedMetadataSnapshot {
            cache_key: cache_key.to_string(),
            manifest_hash: "abc".to_string(),
            manifest: vec![ManifestEntry {
                provider: "codex".into(),
                source_path: "/tmp/a.jsonl".into(),
                mtime_ns: 1,
                size: 10,
            }],
            sessions: vec![],
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn miss_when_no_candidate_has_a_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = MetadataCache::new(vec![dir.path().join("nope")]);
        let result = cache.load("key1");
        assert_eq!(result.status, LoadStatus::Miss);
    }

    #[test]
    fn persist_then_load_round_trips_on_first_candidate() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = MetadataCache::new(vec![dir.path().to_path_buf()]);
        let persisted = cache.persist(&snapshot("key1"));
        assert_eq!(persisted.status, PersistStatus::Hit);

        let loaded = cache.load("key1");
        assert_eq!(loaded.status, LoadStatus::Hit);
        assert_eq!(loaded.snapshot.unwrap().cache_key, "key1");
    }

    #[test]
    fn cache_key_mismatch_is_a_miss() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = MetadataCache::new(vec![dir.path().to_path_buf()]);
        cache.persist(&snapshot("key1"));
        let loaded = cache.load("key2");
        assert_eq!(loaded.status, LoadStatus::Miss);
    }

    #[test]
    fn fallback_hit_on_second_candidate_promotes_it() {
        let primary = tempfile::TempDir::new().unwrap();
        let fallback = tempfile::TempDir::new().unwrap();
        let writer = MetadataCache::new(vec![fallback.path().to_path_buf()]);
        writer.persist(&snapshot("key1"));

        let cache = MetadataCache::new(vec![primary.path().to_path_buf(), fallback.path().to_path_buf()]);
        let loaded = cache.load("key1");
        assert_eq!(loaded.status, LoadStatus::FallbackHit);
    }

    #[test]
    fn invalid_json_reports_fallback_fail_when_no_candidate_hits() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join(METADATA_SNAPSHOT_FILENAME), "{not-json").unwrap();
        let cache = MetadataCache::new(vec![dir.path().to_path_buf()]);
        let loaded = cache.load("key1");
        assert_eq!(loaded.status, LoadStatus::FallbackFail);
    }
}
