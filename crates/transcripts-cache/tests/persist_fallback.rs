use transcripts_cache::{CachedMetadataSnapshot, MetadataCache, PersistStatus};
use transcripts_types::ManifestEntry;

fn snapshot() -> CachedMetadataSnapshot {
    CachedMetadataSnapshot {
        cache_key: "key1".to_string(),
        manifest_hash: "abc".to_string(),
        manifest: vec![ManifestEntry {
            provider: "codex".into(),
            source_path: "/tmp/a.jsonl".into(),
            mtime_ns: 1,
            size: 10,
        }],
        sessions: vec![],
        updated_at: chrono::Utc::now(),
    }
}

/// Scenario d: the primary candidate is a regular file, not a directory, so
/// writing into it fails; a second, writable candidate succeeds and the
/// cache reports `fallback_hit` with the write landing under that directory.
#[test]
fn unwritable_primary_falls_back_to_a_writable_candidate() {
    let root = tempfile::TempDir::new().unwrap();
    let primary = root.path().join("primary");
    std::fs::write(&primary, b"not a directory").unwrap();
    let fallback = root.path().join("fallback");

    let cache = MetadataCache::new(vec![primary, fallback.clone()]);
    let result = cache.persist(&snapshot());

    assert_eq!(result.status, PersistStatus::FallbackHit);
    assert_eq!(result.dir, Some(fallback.clone()));
    assert!(fallback.join("metadata_snapshot.json").exists());
    assert!(cache.enabled());
}

/// When every candidate directory is unwritable, the cache reports
/// `write_fail` and disables itself for the rest of the process.
#[test]
fn every_candidate_failing_disables_the_cache() {
    let root = tempfile::TempDir::new().unwrap();
    let blocked_one = root.path().join("blocked-one");
    let blocked_two = root.path().join("blocked-two");
    std::fs::write(&blocked_one, b"not a directory").unwrap();
    std::fs::write(&blocked_two, b"not a directory either").unwrap();

    let cache = MetadataCache::new(vec![blocked_one, blocked_two]);
    let result = cache.persist(&snapshot());

    assert_eq!(result.status, PersistStatus::WriteFail);
    assert!(result.dir.is_none());
    assert!(!cache.enabled());
}
