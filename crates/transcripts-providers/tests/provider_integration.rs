use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tempfile::TempDir;
use transcripts_providers::codex::CodexProvider;
use transcripts_providers::gemini::GeminiProvider;
use transcripts_providers::{PerFileCache, Provider};
use transcripts_types::SessionRecord;

fn write_codex_rollout(root: &Path, relative: &str, lines: &[serde_json::Value]) -> PathBuf {
    let path = root.join("sessions").join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let body = lines
        .iter()
        .map(|line| line.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(&path, body).unwrap();
    path
}

fn write_gemini_history(root: &Path, name: &str, payload: serde_json::Value) -> PathBuf {
    let dir = root.join("history");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, payload.to_string()).unwrap();
    path
}

/// A `PerFileCache` double that counts lookups and stores so tests can assert
/// a provider actually consults the cache instead of rebuilding every call.
#[derive(Default)]
struct CountingCache {
    entries: Mutex<std::collections::HashMap<(String, PathBuf), SessionRecord>>,
    lookups: AtomicUsize,
    stores: AtomicUsize,
}

impl PerFileCache for CountingCache {
    fn lookup(&self, provider: &str, path: &Path) -> Option<SessionRecord> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap()
            .get(&(provider.to_string(), path.to_path_buf()))
            .cloned()
    }

    fn store(&self, provider: &str, path: &Path, record: &SessionRecord) {
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap()
            .insert((provider.to_string(), path.to_path_buf()), record.clone());
    }
}

#[test]
fn codex_session_enumeration_feeds_a_per_file_cache_on_first_build_and_hits_it_on_second() {
    let dir = TempDir::new().unwrap();
    write_codex_rollout(
        dir.path(),
        "2026/01/01/rollout-2026-01-01T00-00-00-abc12.jsonl",
        &[
            json!({"timestamp": "2026-01-01T00:00:00Z", "payload": {"type": "message", "role": "user", "content": "hi"}}),
            json!({"timestamp": "2026-01-01T00:01:00Z", "payload": {"type": "message", "role": "assistant", "content": "hello", "model": "gpt-5"}}),
        ],
    );

    let mut provider = CodexProvider::new(dir.path().to_path_buf());
    let cache = Arc::new(CountingCache::default());
    provider.attach_cache(Some(cache.clone() as Arc<dyn PerFileCache>));

    let first = provider.sessions();
    assert_eq!(first.len(), 1);
    assert_eq!(cache.stores.load(Ordering::SeqCst), 1);

    let second = provider.sessions();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].session_id, first[0].session_id);
    // the second pass found the record already cached, so it never re-stored it
    assert_eq!(cache.stores.load(Ordering::SeqCst), 1);
    assert!(cache.lookups.load(Ordering::SeqCst) >= 2);
}

#[test]
fn codex_rejects_source_paths_outside_its_base_dir() {
    let dir = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    let path = write_codex_rollout(
        dir.path(),
        "2026/01/01/rollout-2026-01-01T00-00-00-abc12.jsonl",
        &[json!({"timestamp": "2026-01-01T00:00:00Z", "payload": {"type": "message", "role": "user", "content": "hi"}})],
    );

    let provider = CodexProvider::new(dir.path().to_path_buf());
    assert!(provider.load_session_from_source_path(&path, None).is_some());

    let unrelated = outside.path().join("rollout-x.jsonl");
    std::fs::write(&unrelated, "{}").unwrap();
    assert!(provider.load_session_from_source_path(&unrelated, None).is_none());
}

#[test]
fn sessions_from_distinct_providers_aggregate_in_recency_order() {
    let codex_dir = TempDir::new().unwrap();
    write_codex_rollout(
        codex_dir.path(),
        "2026/01/01/rollout-2026-01-01T00-00-00-abc12.jsonl",
        &[json!({"timestamp": "2026-01-01T00:00:00Z", "payload": {"type": "message", "role": "user", "content": "older"}})],
    );

    let gemini_dir = TempDir::new().unwrap();
    write_gemini_history(
        gemini_dir.path(),
        "session-newer.json",
        json!({
            "sessionId": "gemini-newer",
            "startTime": "2026-02-01T00:00:00Z",
            "lastUpdated": "2026-02-01T00:05:00Z",
            "messages": [{"role": "user", "content": "hi", "timestamp": "2026-02-01T00:00:00Z"}],
        }),
    );

    let codex: Box<dyn Provider> = Box::new(CodexProvider::new(codex_dir.path().to_path_buf()));
    let gemini: Box<dyn Provider> = Box::new(GeminiProvider::new(gemini_dir.path().to_path_buf()));

    let mut combined: Vec<SessionRecord> = codex.sessions();
    combined.extend(gemini.sessions());
    combined.sort_by(|a, b| {
        let key = |r: &SessionRecord| r.updated_at.or(r.started_at);
        key(b).cmp(&key(a))
    });

    assert_eq!(combined.len(), 2);
    assert_eq!(combined[0].provider, "gemini-cli");
    assert_eq!(combined[1].provider, "openai-codex");
}
