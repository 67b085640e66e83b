//! Codex CLI rollout logs: one JSONL file per session under
//! `$CODEX_HOME/sessions/<year>/<month>/<day>/rollout-*.jsonl`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use transcripts_normalize::{NormalizeOptions, Normalizer, SessionBuilder};
use transcripts_types::{util, SessionRecord};

use crate::ingest::{iter_files_with_extension, JsonlReader};
use crate::{PerFileCache, Provider};

const ENV_VAR: &str = "CODEX_HOME";

pub struct CodexProvider {
    base_dir: PathBuf,
    cache: Option<Arc<dyn PerFileCache>>,
}

impl CodexProvider {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            cache: None,
        }
    }

    pub fn from_env() -> Self {
        let base_dir = std::env::var(ENV_VAR)
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".codex")))
            .unwrap_or_else(|| PathBuf::from(".codex"));
        Self::new(base_dir)
    }

    fn session_id_from_path(&self, path: &Path) -> String {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        let parts: Vec<&str> = stem.split('-').collect();
        if parts.len() >= 5 {
            parts[parts.len() - 5..].join("-")
        } else {
            stem.to_string()
        }
    }

    fn build_session_from_path(&self, path: &Path) -> Option<SessionRecord> {
        let mut builder = SessionBuilder::new("openai-codex", path.to_path_buf());
        builder.set_session_id(Some(&self.session_id_from_path(path)));
        let mut normalizer = Normalizer::new(self.name());

        for event in JsonlReader::new(path) {
            let Value::Object(obj) = &event else { continue };

            let timestamp = codex_timestamp(obj);
            builder.record_timestamp(timestamp);
            if builder.working_dir().is_none() {
                builder.set_working_dir(codex_workdir(obj).as_deref());
            }
            if let Some((model, priority)) = codex_model(obj) {
                builder.set_model(Some(&model), priority);
            }

            if let Some(payload) = obj.get("payload").and_then(Value::as_object)
                && should_normalize_codex_payload(payload)
            {
                let role = payload
                    .get("role")
                    .and_then(Value::as_str)
                    .or_else(|| obj.get("role").and_then(Value::as_str))
                    .map(str::to_string);
                let normalized = normalizer.normalize_message(
                    &event["payload"],
                    NormalizeOptions {
                        timestamp,
                        role,
                        ..Default::default()
                    },
                );
                if let Some(normalized) = normalized {
                    builder.add_normalized_message(normalized, None);
                }
            }
        }

        builder.build(None)
    }

    fn build_cached(&self, path: &Path) -> Option<SessionRecord> {
        if let Some(cache) = &self.cache
            && let Some(record) = cache.lookup(self.name(), path)
        {
            return Some(record);
        }
        let record = self.build_session_from_path(path)?;
        if let Some(cache) = &self.cache {
            cache.store(self.name(), path, &record);
        }
        Some(record)
    }
}

impl Provider for CodexProvider {
    fn name(&self) -> &'static str {
        "openai-codex"
    }

    fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn env_var(&self) -> Option<&'static str> {
        Some(ENV_VAR)
    }

    fn session_paths(&self) -> Vec<PathBuf> {
        iter_files_with_extension(&self.base_dir.join("sessions"), &["jsonl"])
    }

    fn sessions(&self) -> Vec<SessionRecord> {
        let mut records: Vec<SessionRecord> = self
            .session_paths()
            .iter()
            .filter_map(|path| self.build_cached(path))
            .collect();
        super::sort_by_recency(&mut records);
        records
    }

    fn load_session_from_source_path(
        &self,
        source_path: &Path,
        session_id: Option<&str>,
    ) -> Option<SessionRecord> {
        let resolved = source_path.canonicalize().ok()?;
        let base_resolved = self.base_dir.canonicalize().ok()?;
        if !resolved.is_file() || !resolved.starts_with(&base_resolved) {
            return None;
        }
        let record = self.build_cached(&resolved)?;
        if let Some(session_id) = session_id
            && record.session_id != session_id
        {
            return None;
        }
        Some(record)
    }

    fn attach_cache(&mut self, cache: Option<Arc<dyn PerFileCache>>) {
        self.cache = cache;
    }
}

fn codex_timestamp(event: &serde_json::Map<String, Value>) -> Option<DateTime<Utc>> {
    for key in ["timestamp", "created_at", "time", "ts", "stored_at"] {
        if let Some(value) = event.get(key)
            && let Some(ts) = util::parse_timestamp(value)
        {
            return Some(ts);
        }
    }
    None
}

fn codex_workdir(event: &serde_json::Map<String, Value>) -> Option<String> {
    let mut sources: Vec<&serde_json::Map<String, Value>> = vec![event];
    if let Some(payload) = event.get("payload").and_then(Value::as_object) {
        sources.push(payload);
    }

    for source in &sources {
        for key in [
            "cwd",
            "workspace_root",
            "project_root",
            "working_directory",
            "root",
            "workspace",
        ] {
            if let Some(value) = source.get(key).and_then(Value::as_str)
                && !value.trim().is_empty()
            {
                return Some(value.to_string());
            }
        }
        for key in ["command", "shell", "run", "workspace"] {
            if let Some(nested) = source.get(key).and_then(Value::as_object) {
                for field in ["cwd", "root", "workspace_root", "project_root"] {
                    if let Some(value) = nested.get(field).and_then(Value::as_str)
                        && !value.trim().is_empty()
                    {
                        return Some(value.to_string());
                    }
                }
            }
        }
    }
    None
}

fn codex_model(event: &serde_json::Map<String, Value>) -> Option<(String, i32)> {
    if let Some(payload) = event.get("payload").and_then(Value::as_object) {
        let role = payload.get("role").and_then(Value::as_str);
        if let Some(model) = payload.get("model").and_then(Value::as_str)
            && !model.trim().is_empty()
        {
            let priority = if role == Some("assistant") { 2 } else { 1 };
            return Some((model.to_string(), priority));
        }
        if let Some(context) = payload.get("context").and_then(Value::as_object)
            && let Some(model) = context.get("model").and_then(Value::as_str)
            && !model.trim().is_empty()
        {
            return Some((model.to_string(), 1));
        }
    }
    if let Some(model) = event.get("model").and_then(Value::as_str)
        && !model.trim().is_empty()
    {
        return Some((model.to_string(), 0));
    }
    None
}

fn should_normalize_codex_payload(payload: &serde_json::Map<String, Value>) -> bool {
    let payload_type = payload
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_lowercase();
    if matches!(
        payload_type.as_str(),
        "message"
            | "tool_result"
            | "tool-result"
            | "tool_output"
            | "tool-output"
            | "tool_call"
            | "tool-call"
            | "tool_use"
            | "tool-use"
    ) {
        return true;
    }
    ["content", "parts", "tool_calls", "function_call"]
        .iter()
        .any(|key| payload.contains_key(*key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_rollout(dir: &Path, name: &str, lines: &[Value]) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        path
    }

    #[test]
    fn session_id_derived_from_last_five_stem_parts() {
        let provider = CodexProvider::new(PathBuf::from("/tmp"));
        let id = provider.session_id_from_path(Path::new(
            "/tmp/sessions/2026/01/01/rollout-2026-01-01T00-00-00-abc123.jsonl",
        ));
        assert_eq!(id, "2026-01-01T00-00-00-abc123");
    }

    #[test]
    fn builds_session_from_message_events() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sessions/2026/01/01")).unwrap();
        let path = write_rollout(
            &dir.path().join("sessions/2026/01/01"),
            "rollout-x-y-z-1-2.jsonl",
            &[
                json!({
                    "timestamp": "2026-01-01T00:00:00Z",
                    "payload": {"type": "message", "role": "user", "content": "hi"}
                }),
                json!({
                    "timestamp": "2026-01-01T00:01:00Z",
                    "payload": {"type": "message", "role": "assistant", "content": "hello", "model": "gpt-5"}
                }),
            ],
        );

        let provider = CodexProvider::new(dir.path().to_path_buf());
        let record = provider.build_session_from_path(&path).unwrap();
        assert_eq!(record.messages.len(), 2);
        assert_eq!(record.model.as_deref(), Some("gpt-5"));
    }

    #[test]
    fn non_message_payloads_are_ignored() {
        let dir = TempDir::new().unwrap();
        let path = write_rollout(
            dir.path(),
            "s.jsonl",
            &[json!({"payload": {"type": "environment_context"}})],
        );
        let provider = CodexProvider::new(dir.path().to_path_buf());
        assert!(provider.build_session_from_path(&path).is_none());
    }
}
