//! Orchestrates provider enumeration behind a refresh-interval gate, coalesces
//! concurrent refreshes and direct loads, and serves queries over the
//! resulting in-memory snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::Instant;

use chrono::Utc;
use transcripts_cache::{CachedMetadataSnapshot, DiskSessionCache, LoadStatus, MetadataCache};
use transcripts_providers::{PerFileCache, Provider};
use transcripts_types::{manifest_hash, Manifest, ManifestEntry, SessionRecord};

use crate::cache_key;
use crate::config::ServiceConfig;
use crate::query::{self, QueryPage, SessionQuery};

struct Snapshot {
    sessions: Vec<SessionRecord>,
    manifest: Manifest,
    manifest_hash: String,
    cache_key: String,
    last_loaded: Option<Instant>,
    refreshing: bool,
    bootstrapped: bool,
}

impl Snapshot {
    fn empty(cache_key: String) -> Self {
        Self {
            sessions: Vec::new(),
            manifest: Vec::new(),
            manifest_hash: String::new(),
            cache_key,
            last_loaded: None,
            refreshing: false,
            bootstrapped: false,
        }
    }
}

/// Drops `refreshing` back to `false` and wakes waiters even if a provider
/// panics mid-refresh, so a single bad provider can't wedge every caller.
struct RefreshGuard<'a> {
    service: &'a SessionService,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        let mut guard = self.service.snapshot.lock().expect("snapshot lock poisoned");
        if guard.refreshing {
            guard.refreshing = false;
            self.service.refresh_done.notify_all();
        }
    }
}

/// The long-lived session service: one per process, shared behind an `Arc`
/// by callers that want concurrent access.
pub struct SessionService {
    providers: Mutex<Vec<Box<dyn Provider>>>,
    snapshot: Mutex<Snapshot>,
    refresh_done: Condvar,
    session_cache: Option<Arc<DiskSessionCache>>,
    metadata_cache: MetadataCache,
    config: ServiceConfig,
    direct_inflight: Mutex<HashMap<String, Arc<OnceLock<Option<SessionRecord>>>>>,
}

impl SessionService {
    pub fn new(providers: Vec<Box<dyn Provider>>, config: ServiceConfig) -> Self {
        let key = cache_key::compute(&providers);

        let session_cache = if config.disk_cache_disabled {
            None
        } else {
            let cache = config
                .cache_dir_override
                .clone()
                .map(DiskSessionCache::new)
                .unwrap_or_else(DiskSessionCache::from_env);
            cache.load();
            Some(Arc::new(cache))
        };

        let metadata_cache = match &config.cache_dir_override {
            Some(dir) => MetadataCache::new(vec![dir.clone()]),
            None => MetadataCache::from_env(),
        };

        Self {
            providers: Mutex::new(providers),
            snapshot: Mutex::new(Snapshot::empty(key)),
            refresh_done: Condvar::new(),
            session_cache,
            metadata_cache,
            config,
            direct_inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Filtered, ordered, paginated view over the current snapshot, refreshing
    /// it first if the configured interval has elapsed.
    pub fn list_sessions(&self, query: &SessionQuery) -> QueryPage {
        self.ensure_fresh();
        let mut guard = self.snapshot.lock().expect("snapshot lock poisoned");
        query::run(&mut guard.sessions, query)
    }

    /// The full unfiltered snapshot, refreshing it first if stale.
    pub fn all_sessions(&self) -> Vec<SessionRecord> {
        self.ensure_fresh();
        self.snapshot.lock().expect("snapshot lock poisoned").sessions.clone()
    }

    /// Opens one session directly by source path, bypassing full enumeration.
    /// Concurrent calls with the same `(provider, path, session_id)` key
    /// coalesce onto a single provider call.
    pub fn get_session(
        &self,
        provider_name: Option<&str>,
        source_path: &Path,
        session_id: Option<&str>,
    ) -> Option<SessionRecord> {
        let key = format!(
            "{}::{}::{}",
            provider_name.unwrap_or("*"),
            source_path.display(),
            session_id.unwrap_or("")
        );

        let cell = {
            let mut inflight = self.direct_inflight.lock().expect("direct-load map poisoned");
            inflight.entry(key.clone()).or_insert_with(|| Arc::new(OnceLock::new())).clone()
        };

        let result = cell
            .get_or_init(|| self.perform_direct_load(provider_name, source_path, session_id))
            .clone();

        self.direct_inflight.lock().expect("direct-load map poisoned").remove(&key);

        if let Some(record) = &result {
            self.upsert(record.clone());
        }
        result
    }

    fn perform_direct_load(
        &self,
        provider_name: Option<&str>,
        source_path: &Path,
        session_id: Option<&str>,
    ) -> Option<SessionRecord> {
        let _span = tracing::debug_span!("session_service.direct_load", path = %source_path.display()).entered();
        let providers = self.providers.lock().expect("provider lock poisoned");
        providers
            .iter()
            .filter(|p| provider_name.is_none_or(|name| p.name() == name))
            .find_map(|p| p.load_session_from_source_path(source_path, session_id))
    }

    fn upsert(&self, record: SessionRecord) {
        let mut guard = self.snapshot.lock().expect("snapshot lock poisoned");
        match guard
            .sessions
            .iter_mut()
            .find(|s| s.provider == record.provider && s.session_id == record.session_id)
        {
            Some(existing) => *existing = record,
            None => guard.sessions.push(record),
        }
    }

    /// Bootstraps from the metadata snapshot cache on first use, then
    /// refreshes at most once per `refresh_interval`. Concurrent callers that
    /// arrive while a refresh is in flight either wait for it (strict cache,
    /// or an empty snapshot has nothing useful to serve yet) or return with
    /// the stale snapshot still in place.
    fn ensure_fresh(&self) {
        let mut guard = self.snapshot.lock().expect("snapshot lock poisoned");

        if !guard.bootstrapped {
            guard.bootstrapped = true;
            if let Some(snapshot) = (!self.config.disk_cache_disabled)
                .then(|| self.try_bootstrap_from_metadata_cache(&guard.cache_key))
                .flatten()
            {
                guard.sessions = snapshot.sessions;
                guard.manifest = snapshot.manifest;
                guard.manifest_hash = snapshot.manifest_hash;
                guard.last_loaded = Some(Instant::now());
            }
        }

        let stale = guard
            .last_loaded
            .map(|last| last.elapsed() >= self.config.refresh_interval)
            .unwrap_or(true);
        if !stale {
            return;
        }

        if guard.refreshing {
            if self.config.strict_cache || guard.sessions.is_empty() {
                let _guard = self.refresh_done.wait_while(guard, |s| s.refreshing);
            }
            return;
        }

        guard.refreshing = true;
        drop(guard);
        self.run_refresh();
    }

    fn try_bootstrap_from_metadata_cache(&self, cache_key: &str) -> Option<CachedMetadataSnapshot> {
        let result = self.metadata_cache.load(cache_key);
        match result.status {
            LoadStatus::Hit | LoadStatus::FallbackHit => result.snapshot,
            LoadStatus::FallbackFail | LoadStatus::Miss => None,
        }
    }

    /// The single-flight refresh body: enumerates every provider, skips the
    /// rebuild entirely when the content manifest is unchanged, and persists
    /// both cache tiers when it isn't.
    fn run_refresh(&self) {
        let _release = RefreshGuard { service: self };
        let _span = tracing::info_span!("session_service.refresh").entered();

        let mut providers = self.providers.lock().expect("provider lock poisoned");
        if let Some(cache) = &self.session_cache {
            let dyn_cache: Arc<dyn PerFileCache> = cache.clone();
            for provider in providers.iter_mut() {
                provider.attach_cache(Some(dyn_cache.clone()));
            }
        }

        let manifest = build_manifest(&providers);
        let hash = manifest_hash(&manifest);
        let key = self.snapshot.lock().expect("snapshot lock poisoned").cache_key.clone();

        let already_fresh = {
            let guard = self.snapshot.lock().expect("snapshot lock poisoned");
            !guard.sessions.is_empty() && guard.manifest_hash == hash
        };

        let sessions = if already_fresh {
            None
        } else {
            let mut collected = Vec::new();
            for provider in providers.iter() {
                collected.extend(provider.sessions());
            }
            Some(collected)
        };
        drop(providers);

        if let Some(sessions) = &sessions {
            if let Some(cache) = &self.session_cache {
                if let Err(err) = cache.persist() {
                    tracing::debug!(error = %err, "per-file session cache persist failed");
                }
            }
            if !self.config.disk_cache_disabled {
                let to_persist = CachedMetadataSnapshot {
                    cache_key: key,
                    manifest_hash: hash.clone(),
                    manifest: manifest.clone(),
                    sessions: sessions.clone(),
                    updated_at: Utc::now(),
                };
                self.metadata_cache.persist(&to_persist);
            }
        }

        let mut guard = self.snapshot.lock().expect("snapshot lock poisoned");
        if let Some(sessions) = sessions {
            guard.sessions = sessions;
            guard.manifest = manifest;
            guard.manifest_hash = hash;
        }
        guard.last_loaded = Some(Instant::now());
    }
}

fn build_manifest(providers: &[Box<dyn Provider>]) -> Manifest {
    let mut manifest = Vec::new();
    for provider in providers {
        for path in provider.cache_validation_paths() {
            if let Some((mtime_ns, size)) = transcripts_cache::dirs::path_fingerprint(&path) {
                manifest.push(ManifestEntry {
                    provider: provider.name().to_string(),
                    source_path: path.display().to_string(),
                    mtime_ns,
                    size,
                });
            }
        }
    }
    manifest
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingProvider {
        name: &'static str,
        base_dir: PathBuf,
        sessions: Vec<SessionRecord>,
        load_calls: Arc<AtomicUsize>,
    }

    impl Provider for CountingProvider {
        fn name(&self) -> &'static str {
            self.name
        }
        fn base_dir(&self) -> &Path {
            &self.base_dir
        }
        fn env_var(&self) -> Option<&'static str> {
            None
        }
        fn session_paths(&self) -> Vec<PathBuf> {
            vec![]
        }
        fn sessions(&self) -> Vec<SessionRecord> {
            self.sessions.clone()
        }
        fn load_session_from_source_path(&self, _source_path: &Path, _session_id: Option<&str>) -> Option<SessionRecord> {
            self.load_calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.sessions.first().cloned()
        }
        fn attach_cache(&mut self, _cache: Option<Arc<dyn PerFileCache>>) {}
    }

    fn session(id: &str) -> SessionRecord {
        SessionRecord::new(
            "stub",
            id,
            PathBuf::from(format!("/tmp/{id}.jsonl")),
            None,
            None,
            None,
            None,
            vec![],
            vec![],
            None,
        )
    }

    fn disabled_cache_config() -> ServiceConfig {
        ServiceConfig {
            disk_cache_disabled: true,
            refresh_interval: Duration::from_secs(3600),
            ..ServiceConfig::default()
        }
    }

    #[test]
    fn first_call_populates_snapshot_from_providers() {
        let provider = CountingProvider {
            name: "stub",
            base_dir: PathBuf::from("/tmp"),
            sessions: vec![session("a")],
            load_calls: Arc::new(AtomicUsize::new(0)),
        };
        let service = SessionService::new(vec![Box::new(provider)], disabled_cache_config());
        let sessions = service.all_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, "a");
    }

    #[test]
    fn unchanged_manifest_skips_provider_enumeration_on_second_refresh() {
        let provider = CountingProvider {
            name: "stub",
            base_dir: PathBuf::from("/tmp"),
            sessions: vec![session("a")],
            load_calls: Arc::new(AtomicUsize::new(0)),
        };
        let service = SessionService::new(
            vec![Box::new(provider)],
            ServiceConfig {
                disk_cache_disabled: true,
                refresh_interval: Duration::from_secs(0),
                ..ServiceConfig::default()
            },
        );
        assert_eq!(service.all_sessions().len(), 1);
        assert_eq!(service.all_sessions().len(), 1);
    }

    #[test]
    fn concurrent_direct_loads_for_the_same_key_coalesce_to_one_provider_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = CountingProvider {
            name: "stub",
            base_dir: PathBuf::from("/tmp"),
            sessions: vec![session("a")],
            load_calls: calls.clone(),
        };
        let service = Arc::new(SessionService::new(vec![Box::new(provider)], disabled_cache_config()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = service.clone();
                std::thread::spawn(move || service.get_session(Some("stub"), Path::new("/tmp/a.jsonl"), Some("a")))
            })
            .collect();
        for handle in handles {
            let result = handle.join().unwrap();
            assert_eq!(result.unwrap().session_id, "a");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn direct_load_upserts_into_the_snapshot() {
        let provider = CountingProvider {
            name: "stub",
            base_dir: PathBuf::from("/tmp"),
            sessions: vec![session("a")],
            load_calls: Arc::new(AtomicUsize::new(0)),
        };
        let service = SessionService::new(vec![Box::new(provider)], disabled_cache_config());
        service.get_session(Some("stub"), Path::new("/tmp/a.jsonl"), Some("a"));
        assert!(service.all_sessions().iter().any(|s| s.session_id == "a"));
    }
}
