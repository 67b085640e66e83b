//! Stable cache key over provider configuration, so a changed `base_dir` or
//! env var override invalidates the metadata snapshot instead of silently
//! serving sessions enumerated under a different configuration.

use serde::Serialize;
use sha2::{Digest, Sha256};
use transcripts_providers::Provider;

#[derive(Serialize)]
struct ProviderFingerprint {
    name: &'static str,
    base_dir: String,
    env_var: Option<&'static str>,
    env_value: Option<String>,
}

pub fn compute(providers: &[Box<dyn Provider>]) -> String {
    let mut fingerprints: Vec<ProviderFingerprint> = providers
        .iter()
        .map(|p| ProviderFingerprint {
            name: p.name(),
            base_dir: p.base_dir().display().to_string(),
            env_var: p.env_var(),
            env_value: p.env_var().and_then(|name| std::env::var(name).ok()),
        })
        .collect();
    fingerprints.sort_by(|a, b| a.name.cmp(b.name));

    let payload = serde_json::json!({
        "schema_version": transcripts_cache::METADATA_SCHEMA_VERSION,
        "providers": fingerprints,
    });
    let encoded = serde_json::to_vec(&payload).expect("fingerprint payload always serializes");

    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use transcripts_providers::PerFileCache;
    use transcripts_types::SessionRecord;

    struct StubProvider {
        name: &'static str,
        base_dir: PathBuf,
    }

    impl Provider for StubProvider {
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
            vec![]
        }
        fn attach_cache(&mut self, _cache: Option<Arc<dyn PerFileCache>>) {}
    }

    #[test]
    fn key_changes_when_base_dir_changes() {
        let a: Vec<Box<dyn Provider>> = vec![Box::new(StubProvider {
            name: "codex",
            base_dir: PathBuf::from("/home/a"),
        })];
        let b: Vec<Box<dyn Provider>> = vec![Box::new(StubProvider {
            name: "codex",
            base_dir: PathBuf::from("/home/b"),
        })];
        assert_ne!(compute(&a), compute(&b));
    }

    #[test]
    fn key_is_order_independent() {
        let a: Vec<Box<dyn Provider>> = vec![
            Box::new(StubProvider { name: "codex", base_dir: PathBuf::from("/h") }),
            Box::new(StubProvider { name: "claude-code", base_dir: PathBuf::from("/h2") }),
        ];
        let b: Vec<Box<dyn Provider>> = vec![
            Box::new(StubProvider { name: "claude-code", base_dir: PathBuf::from("/h2") }),
            Box::new(StubProvider { name: "codex", base_dir: PathBuf::from("/h") }),
        ];
        assert_eq!(compute(&a), compute(&b));
    }
}
