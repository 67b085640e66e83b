//! Claude Code CLI sessions: JSONL transcripts under
//! `$CLAUDE_HOME/projects/<project>/**/*.jsonl`, reconciled with whatever
//! conversation history survives in the CLI's own `__store.db` SQLite cache.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::Connection;
use serde_json::Value;
use transcripts_normalize::{merge_session_records, NormalizeOptions, Normalizer, SessionBuilder};
use transcripts_types::{util, Message, SessionRecord};

use crate::ingest::{iter_files_with_extension, JsonlReader};
use crate::{PerFileCache, Provider};

const ENV_VAR: &str = "CLAUDE_HOME";

pub struct ClaudeProvider {
    base_dir: PathBuf,
    cache: Option<Arc<dyn PerFileCache>>,
    workdir_cache: Mutex<HashMap<PathBuf, Option<String>>>,
}

impl ClaudeProvider {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            cache: None,
            workdir_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_env() -> Self {
        let base_dir = std::env::var(ENV_VAR)
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".claude")))
            .unwrap_or_else(|| PathBuf::from(".claude"));
        Self::new(base_dir)
    }

    fn session_id_from_path(&self, path: &Path) -> String {
        claude_session_id(path)
    }

    fn project_workdir_for(&self, path: &Path) -> Option<String> {
        let projects_dir = self.base_dir.join("projects");
        let relative = path.strip_prefix(&projects_dir).ok()?;
        let project_name = relative.components().next()?.as_os_str().to_str()?;
        let project_dir = projects_dir.join(project_name);

        let mut cache = self.workdir_cache.lock().expect("workdir cache poisoned");
        if let Some(cached) = cache.get(&project_dir) {
            return cached.clone();
        }
        let workdir = project_workdir(&project_dir);
        cache.insert(project_dir, workdir.clone());
        workdir
    }

    fn build_session_from_path(&self, path: &Path) -> Option<SessionRecord> {
        let mut builder = SessionBuilder::new(self.name(), path.to_path_buf());
        builder.set_session_id(Some(&self.session_id_from_path(path)));
        builder.set_working_dir(self.project_workdir_for(path).as_deref());

        let mut normalizer = Normalizer::new(self.name());
        for event in JsonlReader::new(path) {
            let Value::Object(obj) = &event else { continue };

            let timestamp = claude_event_timestamp(obj);
            builder.record_timestamp(timestamp);
            if builder.working_dir().is_none() {
                builder.set_working_dir(claude_event_workdir(obj).as_deref());
            }

            let message = obj.get("message").and_then(Value::as_object);
            if let Some(message) = message {
                if let Some(model) = message.get("model").and_then(Value::as_str)
                    && !model.trim().is_empty()
                {
                    let priority = if message.get("role").and_then(Value::as_str) == Some("assistant") {
                        2
                    } else {
                        1
                    };
                    builder.set_model(Some(model), priority);
                }

                let normalized = normalizer.normalize_message(
                    &event["message"],
                    NormalizeOptions {
                        timestamp,
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

impl Provider for ClaudeProvider {
    fn name(&self) -> &'static str {
        "claude-code"
    }

    fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn env_var(&self) -> Option<&'static str> {
        Some(ENV_VAR)
    }

    fn session_paths(&self) -> Vec<PathBuf> {
        iter_files_with_extension(&self.base_dir.join("projects"), &["jsonl"])
    }

    fn sessions(&self) -> Vec<SessionRecord> {
        let mut records: HashMap<String, SessionRecord> = HashMap::new();
        for path in self.session_paths() {
            if let Some(record) = self.build_cached(&path) {
                records.insert(record.session_id.clone(), record);
            }
        }

        for record in load_store_sessions(&self.base_dir.join("__store.db")) {
            match records.get(&record.session_id) {
                Some(existing) => {
                    let merged = merge_session_records(existing, &record);
                    records.insert(merged.session_id.clone(), merged);
                }
                None => {
                    records.insert(record.session_id.clone(), record);
                }
            }
        }

        let mut out: Vec<SessionRecord> = records.into_values().collect();
        super::sort_by_recency(&mut out);
        out
    }

    fn attach_cache(&mut self, cache: Option<Arc<dyn PerFileCache>>) {
        self.cache = cache;
    }
}

static UUID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap()
});

fn claude_session_id(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    if UUID_PATTERN.is_match(stem) {
        return stem.to_string();
    }

    let parts: Vec<&str> = stem.split('-').filter(|p| !p.is_empty()).collect();
    if parts.len() >= 5 {
        return parts[parts.len() - 5..].join("-");
    }
    if stem.len() >= 8 {
        return stem.to_string();
    }
    match path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()) {
        Some(parent) if !parent.is_empty() => format!("{parent}:{stem}"),
        _ => stem.to_string(),
    }
}

fn project_workdir(project_dir: &Path) -> Option<String> {
    const METADATA_FILES: &[&str] = &[
        "project.json",
        "metadata.json",
        "project_metadata.json",
        "manifest.json",
    ];
    const KEYS: &[&str] = &["absolutePath", "projectPath", "workspaceRoot", "rootPath", "path"];

    for name in METADATA_FILES {
        let candidate = project_dir.join(name);
        let Ok(text) = std::fs::read_to_string(&candidate) else { continue };
        let Ok(payload) = serde_json::from_str::<Value>(&text) else { continue };
        let Some(obj) = payload.as_object() else { continue };

        for key in KEYS {
            if let Some(value) = obj.get(*key).and_then(Value::as_str)
                && !value.trim().is_empty()
            {
                return Some(value.to_string());
            }
        }
        for container in ["project", "workspace", "meta"] {
            if let Some(nested) = obj.get(container).and_then(Value::as_object) {
                for key in KEYS {
                    if let Some(value) = nested.get(*key).and_then(Value::as_str)
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

fn claude_event_timestamp(event: &serde_json::Map<String, Value>) -> Option<DateTime<Utc>> {
    let message = event.get("message").and_then(Value::as_object);
    for key in ["timestamp", "created_at", "time", "ts"] {
        if let Some(value) = event.get(key)
            && let Some(ts) = util::parse_timestamp(value)
        {
            return Some(ts);
        }
    }
    if let Some(message) = message {
        for key in ["timestamp", "createdAt"] {
            if let Some(value) = message.get(key)
                && let Some(ts) = util::parse_timestamp(value)
            {
                return Some(ts);
            }
        }
    }
    None
}

fn claude_event_workdir(event: &serde_json::Map<String, Value>) -> Option<String> {
    for key in ["cwd", "workspace_root", "project_path"] {
        if let Some(value) = event.get(key).and_then(Value::as_str)
            && !value.trim().is_empty()
        {
            return Some(value.to_string());
        }
    }
    for key in ["workspace", "project", "session", "context"] {
        if let Some(nested) = event.get(key).and_then(Value::as_object) {
            for field in ["cwd", "workspace_root", "project_path", "root", "path"] {
                if let Some(value) = nested.get(field).and_then(Value::as_str)
                    && !value.trim().is_empty()
                {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// Reconcile whatever of the CLI's own conversation history survives in its
/// SQLite store. Schemas vary across CLI versions, so every table/column is
/// probed for existence before use rather than assumed.
fn load_store_sessions(db_path: &Path) -> Vec<SessionRecord> {
    if !db_path.exists() {
        return Vec::new();
    }
    let Ok(connection) = Connection::open(db_path) else {
        return Vec::new();
    };

    let project_paths = collect_project_paths(&connection);
    let meta = collect_conversation_meta(&connection);
    let messages = collect_conversation_messages(&connection);

    let mut sessions = Vec::new();
    for (conversation_id, message_list) in messages {
        if message_list.is_empty() {
            continue;
        }

        let mut normalizer = Normalizer::new("claude-code");
        let mut normalized_messages = Vec::new();
        for msg in &message_list {
            let payload = serde_json::json!({"role": msg.role, "content": msg.content});
            if let Some(normalized) = normalizer.normalize_message(
                &payload,
                NormalizeOptions {
                    timestamp: msg.created_at,
                    role: Some(msg.role.clone()),
                    ..Default::default()
                },
            ) {
                normalized_messages.push(normalized);
            }
        }

        let default_meta = ConversationMeta::default();
        let metadata = meta.get(&conversation_id).unwrap_or(&default_meta);
        let started_at = message_list.iter().filter_map(|m| m.created_at).min();
        let updated_at = message_list.iter().filter_map(|m| m.created_at).max();

        let working_dir = metadata.working_dir.clone().or_else(|| {
            metadata
                .project_id
                .as_ref()
                .and_then(|id| project_paths.get(id).cloned())
        });

        let mut sorted_messages = message_list.clone();
        sorted_messages.sort_by_key(|m| m.created_at.map(|t| t.timestamp_nanos_opt().unwrap_or(i64::MIN)));
        let mut sorted_normalized = normalized_messages;
        sorted_normalized.sort_by_key(|m| m.timestamp.map(|t| t.timestamp_nanos_opt().unwrap_or(i64::MIN)));

        sessions.push(SessionRecord::new(
            "claude-code",
            format!("store:{conversation_id}"),
            db_path.to_path_buf(),
            metadata.started_at.or(started_at),
            metadata.updated_at.or(updated_at),
            working_dir,
            None,
            sorted_messages,
            sorted_normalized,
            Some(normalizer.into_diagnostics()),
        ));
    }
    sessions
}

#[derive(Default, Clone)]
struct ConversationMeta {
    project_id: Option<String>,
    working_dir: Option<String>,
    started_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

fn table_exists(connection: &Connection, table: &str) -> bool {
    connection
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1 LIMIT 1",
            [table],
            |_| Ok(()),
        )
        .is_ok()
}

fn table_columns(connection: &Connection, table: &str) -> HashSet<String> {
    let Ok(mut stmt) = connection.prepare(&format!("PRAGMA table_info('{table}')")) else {
        return HashSet::new();
    };
    let Ok(rows) = stmt.query_map([], |row| row.get::<_, String>(1)) else {
        return HashSet::new();
    };
    rows.filter_map(|r| r.ok()).collect()
}

fn first_present<'a>(columns: &HashSet<String>, candidates: &[&'a str]) -> Option<&'a str> {
    candidates.iter().copied().find(|c| columns.contains(*c))
}

fn collect_project_paths(connection: &Connection) -> HashMap<String, String> {
    let mut paths = HashMap::new();
    for table in ["projects", "project_metadata"] {
        if !table_exists(connection, table) {
            continue;
        }
        let columns = table_columns(connection, table);
        let Some(id_column) = first_present(&columns, &["id", "project_id", "uuid"]) else { continue };
        let Some(path_column) = first_present(
            &columns,
            &["absolute_path", "project_path", "workspace_root", "root_path", "path"],
        ) else {
            continue;
        };

        let query = format!("SELECT {id_column}, {path_column} FROM {table}");
        let Ok(mut stmt) = connection.prepare(&query) else { continue };
        let Ok(rows) = stmt.query_map([], |row| {
            let id: Option<String> = row.get(0).unwrap_or(None);
            let path: Option<String> = row.get(1).unwrap_or(None);
            Ok((id, path))
        }) else {
            continue;
        };
        for row in rows.flatten() {
            if let (Some(id), Some(path)) = row
                && !path.trim().is_empty()
            {
                paths.insert(id, path);
            }
        }
    }
    paths
}

fn collect_conversation_meta(connection: &Connection) -> HashMap<String, ConversationMeta> {
    let mut meta: HashMap<String, ConversationMeta> = HashMap::new();
    for table in ["conversations", "conversation_summaries"] {
        if !table_exists(connection, table) {
            continue;
        }
        let columns = table_columns(connection, table);
        let Some(id_column) =
            first_present(&columns, &["conversation_id", "conversation_uuid", "id", "uuid"])
        else {
            continue;
        };
        let project_column = first_present(&columns, &["project_id", "workspace_id"]);
        let working_dir_columns: Vec<&str> = ["project_path", "workspace_root", "root_path", "path", "absolute_path"]
            .into_iter()
            .filter(|k| columns.contains(*k))
            .collect();
        let timestamp_columns: Vec<&str> = ["created_at", "started_at", "updated_at", "last_activity_at"]
            .into_iter()
            .filter(|k| columns.contains(*k))
            .collect();

        let Ok(mut stmt) = connection.prepare(&format!("SELECT * FROM {table}")) else { continue };
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let Ok(mut rows) = stmt.query([]) else { continue };
        while let Ok(Some(row)) = rows.next() {
            let get_str = |name: &str| -> Option<String> {
                let idx = column_names.iter().position(|c| c == name)?;
                row.get::<_, Option<String>>(idx).ok().flatten()
            };
            let Some(conversation_id) = get_str(id_column) else { continue };
            let entry = meta.entry(conversation_id).or_default();

            if entry.project_id.is_none()
                && let Some(project_column) = project_column
                && let Some(value) = get_str(project_column)
            {
                entry.project_id = Some(value);
            }
            if entry.working_dir.is_none() {
                for key in &working_dir_columns {
                    if let Some(value) = get_str(key)
                        && !value.trim().is_empty()
                    {
                        entry.working_dir = Some(value);
                        break;
                    }
                }
            }
            for key in &timestamp_columns {
                let Some(raw) = get_str(key) else { continue };
                let Some(parsed) = util::parse_timestamp_str(&raw) else { continue };
                if entry.started_at.is_none_or(|existing| parsed < existing) {
                    entry.started_at = Some(parsed);
                }
                if entry.updated_at.is_none_or(|existing| parsed > existing) {
                    entry.updated_at = Some(parsed);
                }
            }
        }
    }
    meta
}

fn collect_conversation_messages(connection: &Connection) -> HashMap<String, Vec<Message>> {
    let mut conversations: HashMap<String, Vec<Message>> = HashMap::new();
    let message_tables: &[(&str, Option<&str>)] = &[
        ("conversation_messages", None),
        ("messages", None),
        ("base_messages", None),
        ("assistant_messages", Some("assistant")),
        ("user_messages", Some("user")),
    ];

    for (table, default_role) in message_tables {
        if !table_exists(connection, table) {
            continue;
        }
        let columns = table_columns(connection, table);
        let Some(conversation_column) = first_present(
            &columns,
            &["conversation_id", "conversation_uuid", "conversation", "session_id", "session_uuid"],
        ) else {
            continue;
        };
        let role_columns: Vec<&str> = ["role", "author", "speaker", "sender"]
            .into_iter()
            .filter(|k| columns.contains(*k))
            .collect();
        let content_columns: Vec<&str> = ["content", "text", "body", "message", "message_json", "payload"]
            .into_iter()
            .filter(|k| columns.contains(*k))
            .collect();
        let timestamp_column = first_present(&columns, &["created_at", "timestamp", "time", "ts"]);

        let Ok(mut stmt) = connection.prepare(&format!("SELECT * FROM {table}")) else { continue };
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let Ok(mut rows) = stmt.query([]) else { continue };
        while let Ok(Some(row)) = rows.next() {
            let get_str = |name: &str| -> Option<String> {
                let idx = column_names.iter().position(|c| c == name)?;
                row.get::<_, Option<String>>(idx).ok().flatten()
            };
            let Some(conversation_id) = get_str(conversation_column) else { continue };

            let role = role_columns
                .iter()
                .find_map(|key| get_str(key).filter(|v| !v.trim().is_empty()))
                .or_else(|| default_role.map(str::to_string))
                .unwrap_or_else(|| "event".to_string());

            let content_value = content_columns.iter().find_map(|key| get_str(key));
            let text = content_value
                .as_deref()
                .map(|raw| match maybe_json(raw) {
                    Some(json) => util::stringify_content(&json),
                    None => raw.to_string(),
                })
                .unwrap_or_default();
            let text = text.trim().to_string();
            if text.is_empty() {
                continue;
            }

            let timestamp = timestamp_column
                .and_then(|key| get_str(key))
                .and_then(|raw| util::parse_timestamp_str(&raw));

            conversations.entry(conversation_id).or_default().push(Message {
                role,
                content: text,
                created_at: timestamp,
            });
        }
    }
    conversations
}

fn maybe_json(value: &str) -> Option<Value> {
    let trimmed = value.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_stem_used_verbatim() {
        let path = Path::new("/tmp/a1b2c3d4-e5f6-7890-abcd-ef1234567890.jsonl");
        assert_eq!(
            claude_session_id(path),
            "a1b2c3d4-e5f6-7890-abcd-ef1234567890"
        );
    }

    #[test]
    fn short_non_uuid_stem_falls_back_to_parent_prefix() {
        let path = Path::new("/tmp/projects/my-proj/abc.jsonl");
        assert_eq!(claude_session_id(path), "my-proj:abc");
    }

    #[test]
    fn store_sessions_empty_when_db_missing() {
        assert!(load_store_sessions(Path::new("/nonexistent/__store.db")).is_empty());
    }

    #[test]
    fn store_sessions_probe_dynamic_schema() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("__store.db");
        let connection = Connection::open(&db_path).unwrap();
        connection
            .execute_batch(
                "CREATE TABLE conversations (conversation_id TEXT, project_path TEXT, created_at TEXT);
                 INSERT INTO conversations VALUES ('c1', '/work/proj', '2026-01-01T00:00:00Z');
                 CREATE TABLE messages (conversation_id TEXT, role TEXT, content TEXT, created_at TEXT);
                 INSERT INTO messages VALUES ('c1', 'user', 'hi', '2026-01-01T00:00:00Z');
                 INSERT INTO messages VALUES ('c1', 'assistant', 'hello', '2026-01-01T00:01:00Z');",
            )
            .unwrap();
        drop(connection);

        let sessions = load_store_sessions(&db_path);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, "store:c1");
        assert_eq!(sessions[0].messages.len(), 2);
        assert_eq!(sessions[0].working_dir.as_deref(), Some("/work/proj"));
    }
}
