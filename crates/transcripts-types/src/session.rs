use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{Message, NormalizationDiagnostics, NormalizedMessage};
use crate::util::strip_private_use;

const SEARCH_BLOB_MAX_LEN: usize = 4000;

/// Aggregated data for one provider session, built from a single source file
/// (or merged from two overlapping ones).
///
/// Invariants: `messages` is ordered by `created_at` ascending (missing
/// timestamps sort first, ties broken by insertion order); the same holds for
/// `normalized_messages` by `timestamp`; `started_at <= updated_at` when both
/// are present. `search_index` is derived and never hand-edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub provider: String,
    pub session_id: String,
    pub source_path: PathBuf,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub working_dir: Option<String>,
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub normalized_messages: Vec<NormalizedMessage>,
    pub normalization_diagnostics: Option<NormalizationDiagnostics>,
    #[serde(skip)]
    search_index: Option<SessionSearchIndex>,
}

impl SessionRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: impl Into<String>,
        session_id: impl Into<String>,
        source_path: PathBuf,
        started_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
        working_dir: Option<String>,
        model: Option<String>,
        messages: Vec<Message>,
        normalized_messages: Vec<NormalizedMessage>,
        normalization_diagnostics: Option<NormalizationDiagnostics>,
    ) -> Self {
        let mut record = Self {
            provider: provider.into(),
            session_id: session_id.into(),
            source_path,
            started_at,
            updated_at,
            working_dir,
            model,
            messages,
            normalized_messages,
            normalization_diagnostics,
            search_index: None,
        };
        record.refresh_search_index();
        record
    }

    pub fn first_message(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// (Re)compute the derived search index. Called on construction; also
    /// available for callers that deserialized a record without one.
    pub fn refresh_search_index(&mut self) -> &SessionSearchIndex {
        self.search_index = Some(SessionSearchIndex::from_session(self));
        self.search_index.as_ref().expect("just assigned")
    }

    /// The derived search index, computed lazily if the record was
    /// deserialized without one (e.g. loaded straight from a cache payload).
    pub fn search_index(&mut self) -> &SessionSearchIndex {
        if self.search_index.is_none() {
            self.refresh_search_index();
        }
        self.search_index.as_ref().expect("just ensured")
    }
}

/// Lowercased, private-use-stripped substrings derived from a [`SessionRecord`],
/// used for case-insensitive full-text filtering without re-scanning messages
/// on every query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSearchIndex {
    pub provider: String,
    pub session_id: String,
    pub model: String,
    pub working_dir: String,
    pub messages: Vec<String>,
}

impl SessionSearchIndex {
    pub fn from_session(session: &SessionRecord) -> Self {
        let message_blobs: Vec<String> = if !session.normalized_messages.is_empty() {
            session
                .normalized_messages
                .iter()
                .map(flatten_normalized_message)
                .map(|blob| normalize_for_search(&blob))
                .filter(|blob| !blob.is_empty())
                .collect()
        } else {
            session
                .messages
                .iter()
                .map(|m| normalize_for_search(&m.content))
                .filter(|blob| !blob.is_empty())
                .collect()
        };

        Self {
            provider: normalize_for_search(&session.provider),
            session_id: normalize_for_search(&session.session_id),
            model: normalize_for_search(session.model.as_deref().unwrap_or("")),
            working_dir: normalize_for_search(session.working_dir.as_deref().unwrap_or("")),
            messages: message_blobs,
        }
    }

    /// `lowered_term` must already be lowercased; matching is plain substring.
    pub fn matches(&self, lowered_term: &str) -> bool {
        if lowered_term.is_empty() {
            return true;
        }
        for value in [&self.provider, &self.session_id, &self.model, &self.working_dir] {
            if !value.is_empty() && value.contains(lowered_term) {
                return true;
            }
        }
        self.messages.iter().any(|m| m.contains(lowered_term))
    }
}

fn normalize_for_search(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    strip_private_use(value).to_lowercase()
}

fn flatten_normalized_message(message: &NormalizedMessage) -> String {
    let mut chunks = Vec::new();
    for part in &message.parts {
        match part.kind() {
            "text" | "code" => {
                if let Some(text) = part.text() {
                    if !text.is_empty() {
                        chunks.push(text.to_string());
                    }
                }
            }
            "tool-call" => {
                let name = part.tool_name().unwrap_or("tool");
                let args = safe_json(part.arguments());
                chunks.push(format!("[tool-call] {name} {args}").trim_end().to_string());
            }
            "tool-result" => {
                let name = part.tool_name().unwrap_or("tool");
                let out = safe_json(part.output());
                chunks.push(
                    format!("[tool-result] {name} {out}")
                        .trim_end()
                        .to_string(),
                );
            }
            _ => {}
        }
    }
    let value = chunks.join("\n");
    if value.chars().count() > SEARCH_BLOB_MAX_LEN {
        let truncated: String = value.chars().take(SEARCH_BLOB_MAX_LEN).collect();
        format!("{truncated}\u{2026}")
    } else {
        value
    }
}

fn safe_json(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_record() -> SessionRecord {
        SessionRecord::new(
            "codex",
            "s1",
            PathBuf::from("/tmp/s1.jsonl"),
            None,
            None,
            None,
            None,
            vec![],
            vec![],
            None,
        )
    }

    #[test]
    fn search_index_populated_on_construction() {
        let mut record = empty_record();
        record.messages.push(Message::new("user", "hello there"));
        record.refresh_search_index();
        let idx = record.search_index();
        assert!(idx.matches("hello"));
        assert!(!idx.matches("goodbye"));
    }

    #[test]
    fn empty_term_matches_everything() {
        let mut record = empty_record();
        assert!(record.search_index().matches(""));
    }

    #[test]
    fn search_index_strips_private_use() {
        let mut record = empty_record();
        record.provider = "cod\u{E000}ex".to_string();
        record.refresh_search_index();
        assert_eq!(record.search_index().provider, "codex");
    }
}
