//! Gemini CLI checkpoints: one whole-file JSON document per session, spread
//! across several candidate roots the CLI has used over time.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use transcripts_normalize::{NormalizeOptions, Normalizer, SessionBuilder};
use transcripts_types::{util, SessionRecord};

use crate::{PerFileCache, Provider};

const ENV_VAR: &str = "GEMINI_HOME";

pub struct GeminiProvider {
    base_dir: PathBuf,
    cache: Option<Arc<dyn PerFileCache>>,
}

impl GeminiProvider {
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
            .or_else(|| dirs::home_dir().map(|home| home.join(".gemini")))
            .unwrap_or_else(|| PathBuf::from(".gemini"));
        Self::new(base_dir)
    }

    fn roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.base_dir.clone()];
        let mut candidates = Vec::new();
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".config/google-generative-ai"));
            candidates.push(home.join(".local/share/google-generative-ai"));
            candidates.push(home.join("Library/Application Support/google/generative-ai"));
        }
        if let Ok(appdata) = std::env::var("APPDATA") {
            candidates.push(PathBuf::from(appdata).join("google").join("generative-ai"));
        }
        for candidate in candidates {
            if !roots.contains(&candidate) {
                roots.push(candidate);
            }
        }
        roots
    }

    fn candidate_files(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for root in self.roots() {
            if !root.exists() {
                continue;
            }
            let tmp_dir = root.join("tmp");
            if tmp_dir.exists() {
                for entry in walkdir::WalkDir::new(&tmp_dir)
                    .into_iter()
                    .filter_map(|e| e.ok())
                {
                    let path = entry.path();
                    if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                    let under_expected_dir = path
                        .parent()
                        .and_then(|p| p.file_name())
                        .and_then(|n| n.to_str())
                        .map(|n| n == "chats" || n == "checkpoints")
                        .unwrap_or(false);
                    if (under_expected_dir
                        || name.starts_with("session-")
                        || name.starts_with("chat-"))
                        && seen.insert(path.to_path_buf())
                    {
                        out.push(path.to_path_buf());
                    }
                }
            }
            let history_dir = root.join("history");
            if history_dir.exists() {
                for entry in walkdir::WalkDir::new(&history_dir)
                    .into_iter()
                    .filter_map(|e| e.ok())
                {
                    let path = entry.path();
                    if path.is_file()
                        && path.extension().and_then(|e| e.to_str()) == Some("json")
                        && seen.insert(path.to_path_buf())
                    {
                        out.push(path.to_path_buf());
                    }
                }
            }
            let checkpoints_dir = root.join("checkpoints");
            if checkpoints_dir.exists() {
                for entry in walkdir::WalkDir::new(&checkpoints_dir)
                    .into_iter()
                    .filter_map(|e| e.ok())
                {
                    let path = entry.path();
                    if path.is_file()
                        && path.extension().and_then(|e| e.to_str()) == Some("json")
                        && seen.insert(path.to_path_buf())
                    {
                        out.push(path.to_path_buf());
                    }
                }
            }
        }
        out.sort();
        out
    }

    fn build_session_from_path(&self, path: &Path) -> Option<SessionRecord> {
        let text = std::fs::read_to_string(path).ok()?;
        let payload: Value = serde_json::from_str(&text).ok()?;
        let obj = payload.as_object()?;

        let mut builder = SessionBuilder::new(self.name(), path.to_path_buf());
        builder.set_session_id(Some(&gemini_session_id(obj, path)));
        builder.set_working_dir(gemini_workdir(obj).as_deref());

        let started_at = obj.get("startTime").and_then(util::parse_timestamp);
        let updated_at = obj.get("lastUpdated").and_then(util::parse_timestamp);
        builder.record_timestamp(started_at);
        builder.record_timestamp(updated_at);

        let mut normalizer = Normalizer::new(self.name());
        let (normalized_messages, model) = gemini_messages(obj, &mut normalizer);
        for message in &normalized_messages {
            builder.record_timestamp(message.timestamp);
        }
        for message in normalized_messages {
            builder.add_normalized_message(message, None);
        }
        if let Some(model) = model {
            builder.set_model(Some(&model), 2);
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

impl Provider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini-cli"
    }

    fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn env_var(&self) -> Option<&'static str> {
        Some(ENV_VAR)
    }

    fn session_paths(&self) -> Vec<PathBuf> {
        self.candidate_files()
    }

    fn sessions(&self) -> Vec<SessionRecord> {
        let mut latest: std::collections::HashMap<String, SessionRecord> =
            std::collections::HashMap::new();
        for path in self.candidate_files() {
            let Some(record) = self.build_cached(&path) else { continue };
            let key = record.session_id.clone();
            let candidate_recency = record.updated_at.or(record.started_at);
            match latest.get(&key) {
                Some(existing)
                    if existing.updated_at.or(existing.started_at) >= candidate_recency => {}
                _ => {
                    latest.insert(key, record);
                }
            }
        }
        let mut records: Vec<SessionRecord> = latest.into_values().collect();
        super::sort_by_recency(&mut records);
        records
    }

    fn attach_cache(&mut self, cache: Option<Arc<dyn PerFileCache>>) {
        self.cache = cache;
    }
}

fn gemini_session_id(payload: &serde_json::Map<String, Value>, path: &Path) -> String {
    for key in ["sessionId", "session_id", "conversationId", "conversation_id"] {
        if let Some(value) = payload.get(key).and_then(Value::as_str)
            && !value.trim().is_empty()
        {
            return value.trim().to_string();
        }
    }
    if let Some(conversation) = payload.get("conversation").and_then(Value::as_object)
        && let Some(id) = conversation.get("id").and_then(Value::as_str)
        && !id.trim().is_empty()
    {
        return id.trim().to_string();
    }
    if let Some(id) = payload.get("checkpoint_id").and_then(Value::as_str)
        && !id.trim().is_empty()
    {
        return id.trim().to_string();
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let parent_name = path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str());
    match parent_name {
        Some("checkpoints") | Some("history") => path
            .parent()
            .and_then(|p| p.parent())
            .and_then(|grandparent| path.strip_prefix(grandparent).ok())
            .map(|rel| rel.to_string_lossy().into_owned())
            .unwrap_or_else(|| stem.to_string()),
        Some(parent) => format!("{parent}:{stem}"),
        None => stem.to_string(),
    }
}

fn gemini_workdir(payload: &serde_json::Map<String, Value>) -> Option<String> {
    for key in [
        "cwd",
        "working_directory",
        "workspace_root",
        "project_root",
        "projectPath",
        "workingDir",
        "root",
    ] {
        if let Some(value) = payload.get(key).and_then(Value::as_str)
            && !value.trim().is_empty()
        {
            return Some(value.to_string());
        }
    }
    if let Some(metadata) = payload.get("metadata").and_then(Value::as_object) {
        let project_meta = metadata
            .get("project")
            .and_then(Value::as_object)
            .unwrap_or(metadata);
        for key in ["cwd", "root", "workspace", "workspace_root"] {
            if let Some(value) = project_meta.get(key).and_then(Value::as_str)
                && !value.trim().is_empty()
            {
                return Some(value.to_string());
            }
        }
    }
    if let Some(project) = payload.get("project").and_then(Value::as_object) {
        for key in ["cwd", "workspace_root", "root"] {
            if let Some(value) = project.get(key).and_then(Value::as_str)
                && !value.trim().is_empty()
            {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn gemini_messages(
    payload: &serde_json::Map<String, Value>,
    normalizer: &mut Normalizer,
) -> (Vec<transcripts_types::NormalizedMessage>, Option<String>) {
    let Some(raw_messages) = payload.get("messages").and_then(Value::as_array) else {
        return (Vec::new(), None);
    };

    let mut seen: HashSet<(String, String, Option<String>)> = HashSet::new();
    let mut found_model: Option<String> = None;
    let mut normalized_messages = Vec::new();

    for entry in raw_messages {
        let Some(entry_obj) = entry.as_object() else { continue };
        let role = ["role", "type", "speaker"]
            .iter()
            .find_map(|key| entry_obj.get(*key).and_then(Value::as_str))
            .map(str::to_string);

        let timestamp = ["timestamp", "create_time", "created_at", "time", "ts"]
            .iter()
            .find_map(|key| entry_obj.get(*key))
            .and_then(util::parse_timestamp);

        let Some(normalized) = normalizer.normalize_message(
            entry,
            NormalizeOptions {
                timestamp,
                role,
                ..Default::default()
            },
        ) else {
            continue;
        };

        let content_source = if entry_obj.contains_key("content") {
            entry_obj.get("content")
        } else {
            entry_obj.get("parts")
        };
        let content_blob = content_source
            .map(util::stringify_content)
            .unwrap_or_default();
        let key = (
            normalized.role.as_str().to_string(),
            content_blob.trim().to_string(),
            timestamp.map(|t: DateTime<Utc>| t.to_rfc3339()),
        );
        if !seen.insert(key) {
            continue;
        }

        if found_model.is_none() {
            let candidate = entry_obj
                .get("model")
                .and_then(Value::as_str)
                .or_else(|| {
                    entry_obj
                        .get("metadata")
                        .and_then(Value::as_object)
                        .and_then(|m| m.get("model"))
                        .and_then(Value::as_str)
                });
            if let Some(candidate) = candidate
                && !candidate.trim().is_empty()
            {
                found_model = Some(candidate.trim().to_string());
            }
        }

        normalized_messages.push(normalized);
    }

    if found_model.is_none()
        && let Some(model) = payload.get("model").and_then(Value::as_str)
        && !model.trim().is_empty()
    {
        found_model = Some(model.trim().to_string());
    }

    (normalized_messages, found_model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn session_id_prefers_explicit_field() {
        let payload = json!({"sessionId": "abc"}).as_object().unwrap().clone();
        assert_eq!(
            gemini_session_id(&payload, Path::new("/tmp/x.json")),
            "abc"
        );
    }

    #[test]
    fn session_id_falls_back_to_parent_prefixed_stem() {
        let payload = serde_json::Map::new();
        let id = gemini_session_id(&payload, Path::new("/tmp/tmp/chats/foo.json"));
        assert_eq!(id, "chats:foo");
    }

    #[test]
    fn builds_session_from_checkpoint_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session-1.json");
        std::fs::write(
            &path,
            json!({
                "sessionId": "s1",
                "startTime": "2026-01-01T00:00:00Z",
                "lastUpdated": "2026-01-01T00:05:00Z",
                "model": "gemini-2.5-pro",
                "messages": [
                    {"role": "user", "content": "hi", "timestamp": "2026-01-01T00:00:00Z"},
                    {"role": "model", "content": "hello", "timestamp": "2026-01-01T00:01:00Z"}
                ]
            })
            .to_string(),
        )
        .unwrap();

        let provider = GeminiProvider::new(dir.path().to_path_buf());
        let record = provider.build_session_from_path(&path).unwrap();
        assert_eq!(record.session_id, "s1");
        assert_eq!(record.model.as_deref(), Some("gemini-2.5-pro"));
        assert_eq!(record.normalized_messages.len(), 2);
    }
}
