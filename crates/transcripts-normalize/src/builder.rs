//! Per-session accumulation shared by providers: dedup keys, timestamp
//! shrink/expand, model priority, and the final ordering pass that produces
//! a [`SessionRecord`].

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use transcripts_types::{
    Message, NormalizationDiagnostics, NormalizedMessage, SessionRecord,
};

use crate::normalize::render_legacy_content;

type DedupeKey = (String, String, Option<String>);

/// Accumulates messages, timestamps, model, and working directory for one
/// session across however many raw events a provider feeds it, then emits a
/// fully ordered [`SessionRecord`].
pub struct SessionBuilder {
    provider: String,
    source_path: PathBuf,
    session_id: Option<String>,
    working_dir: Option<String>,
    model: Option<String>,
    started_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    normalization_diagnostics: Option<NormalizationDiagnostics>,
    messages: Vec<(usize, Message)>,
    message_keys: HashSet<DedupeKey>,
    normalized_messages: Vec<(usize, NormalizedMessage)>,
    normalized_keys: HashSet<DedupeKey>,
    model_priority: i32,
}

impl SessionBuilder {
    pub fn new(provider: impl Into<String>, source_path: PathBuf) -> Self {
        Self {
            provider: provider.into(),
            source_path,
            session_id: None,
            working_dir: None,
            model: None,
            started_at: None,
            updated_at: None,
            normalization_diagnostics: None,
            messages: Vec::new(),
            message_keys: HashSet::new(),
            normalized_messages: Vec::new(),
            normalized_keys: HashSet::new(),
            model_priority: -1,
        }
    }

    pub fn set_session_id(&mut self, value: Option<&str>) {
        let Some(value) = value else { return };
        let candidate = value.trim();
        if !candidate.is_empty() {
            self.session_id = Some(candidate.to_string());
        }
    }

    pub fn record_timestamp(&mut self, timestamp: Option<DateTime<Utc>>) {
        let Some(timestamp) = timestamp else { return };
        if self.started_at.is_none_or(|existing| timestamp < existing) {
            self.started_at = Some(timestamp);
        }
        if self.updated_at.is_none_or(|existing| timestamp > existing) {
            self.updated_at = Some(timestamp);
        }
    }

    pub fn set_working_dir(&mut self, candidate: Option<&str>) {
        if self.working_dir.is_some() {
            return;
        }
        if let Some(candidate) = candidate {
            let value = candidate.trim();
            if !value.is_empty() {
                self.working_dir = Some(value.to_string());
            }
        }
    }

    pub fn set_model(&mut self, candidate: Option<&str>, priority: i32) {
        let Some(candidate) = candidate else { return };
        let value = candidate.trim();
        if value.is_empty() {
            return;
        }
        if priority >= self.model_priority {
            self.model = Some(value.to_string());
            self.model_priority = priority;
        }
    }

    pub fn working_dir(&self) -> Option<&str> {
        self.working_dir.as_deref()
    }

    /// Returns `true` iff the message was newly added (not a dedup hit).
    pub fn add_message(
        &mut self,
        role: Option<&str>,
        content: Option<&str>,
        created_at: Option<DateTime<Utc>>,
        dedupe_key: Option<DedupeKey>,
    ) -> bool {
        let text = content.unwrap_or("").trim();
        let message_role = {
            let trimmed = role.unwrap_or("").trim();
            if trimmed.is_empty() { "event" } else { trimmed }
        };
        if text.is_empty() && message_role.is_empty() {
            return false;
        }

        let key = dedupe_key.unwrap_or_else(|| {
            (
                message_role.to_string(),
                text.to_string(),
                created_at.map(|t| t.to_rfc3339()),
            )
        });
        if self.message_keys.contains(&key) {
            return false;
        }
        self.message_keys.insert(key);

        let mut message = Message::new(message_role, text);
        message.created_at = created_at;
        let order_index = self.messages.len();
        self.messages.push((order_index, message));
        if created_at.is_some() {
            self.record_timestamp(created_at);
        }
        true
    }

    /// Returns `true` iff the message was newly added (not a dedup hit).
    pub fn add_normalized_message(
        &mut self,
        message: NormalizedMessage,
        dedupe_key: Option<DedupeKey>,
    ) -> bool {
        if message.parts.is_empty() {
            return false;
        }

        let content_key = render_legacy_content(&message);
        let key = dedupe_key.unwrap_or_else(|| {
            (
                message.role.as_str().to_string(),
                content_key,
                message.timestamp.map(|t| t.to_rfc3339()),
            )
        });
        if self.normalized_keys.contains(&key) {
            return false;
        }
        self.normalized_keys.insert(key);

        let order_index = self.normalized_messages.len();
        let timestamp = message.timestamp;
        self.normalized_messages.push((order_index, message));
        if timestamp.is_some() {
            self.record_timestamp(timestamp);
        }
        true
    }

    /// Fold another record's content into this builder at the given model
    /// priority. Used both by multi-event providers accumulating as they go
    /// and by [`merge_session_records`] to combine two providers' views of
    /// the same session.
    pub fn ingest_record(&mut self, record: &SessionRecord, priority: i32) {
        self.record_timestamp(record.started_at);
        self.record_timestamp(record.updated_at);
        if let Some(diag) = &record.normalization_diagnostics {
            self.merge_diagnostics(diag);
        }
        if self.working_dir.is_none() {
            self.set_working_dir(record.working_dir.as_deref());
        }
        if let Some(model) = &record.model {
            self.set_model(Some(model), priority);
        }
        for normalized in &record.normalized_messages {
            let key = (
                normalized.role.as_str().to_string(),
                render_legacy_content(normalized),
                normalized.timestamp.map(|t| t.to_rfc3339()),
            );
            self.add_normalized_message(normalized.clone(), Some(key));
        }
        for message in &record.messages {
            let key = (
                message.role.clone(),
                message.content.clone(),
                message.created_at.map(|t| t.to_rfc3339()),
            );
            self.add_message(
                Some(&message.role),
                Some(&message.content),
                message.created_at,
                Some(key),
            );
        }
    }

    fn merge_diagnostics(&mut self, incoming: &NormalizationDiagnostics) {
        let diag = self.normalization_diagnostics.get_or_insert_with(Default::default);
        diag.merge(incoming);
    }

    /// Returns `None` iff no messages, no timestamps, and no model were ever
    /// accumulated — the builder has nothing worth keeping.
    pub fn build(mut self, session_id_override: Option<&str>) -> Option<SessionRecord> {
        let final_session_id = session_id_override
            .map(str::to_string)
            .or(self.session_id.clone())
            .unwrap_or_else(|| {
                self.source_path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });

        if self.messages.is_empty()
            && self.started_at.is_none()
            && self.updated_at.is_none()
            && self.model.is_none()
        {
            return None;
        }

        self.normalized_messages.sort_by_key(|(idx, msg)| {
            (
                msg.timestamp.map(|t| t.timestamp_nanos_opt().unwrap_or(i64::MIN)).unwrap_or(i64::MIN),
                *idx,
            )
        });
        let normalized_messages: Vec<NormalizedMessage> =
            self.normalized_messages.into_iter().map(|(_, m)| m).collect();

        self.messages.sort_by_key(|(idx, msg)| {
            (
                msg.created_at.map(|t| t.timestamp_nanos_opt().unwrap_or(i64::MIN)).unwrap_or(i64::MIN),
                *idx,
            )
        });
        let mut messages: Vec<Message> = self.messages.into_iter().map(|(_, m)| m).collect();

        if messages.is_empty() && !normalized_messages.is_empty() {
            messages = normalized_messages
                .iter()
                .map(|normalized| {
                    let mut m = Message::new(
                        normalized.role.as_str(),
                        render_legacy_content(normalized),
                    );
                    m.created_at = normalized.timestamp;
                    m
                })
                .collect();
        }

        Some(SessionRecord::new(
            self.provider,
            final_session_id,
            self.source_path,
            self.started_at,
            self.updated_at,
            self.working_dir,
            self.model,
            messages,
            normalized_messages,
            self.normalization_diagnostics,
        ))
    }
}

/// Combine two records describing the same logical session (e.g. a
/// file-log view and a store-backed view) while deduplicating messages.
///
/// The primary record always wins for identifiers; timestamps are merged to
/// the earliest start and latest update; the incoming model is preferred
/// over the primary's (higher ingest priority); messages are deduped by
/// role/content/timestamp so repeats across providers collapse.
pub fn merge_session_records(primary: &SessionRecord, incoming: &SessionRecord) -> SessionRecord {
    let mut builder = SessionBuilder::new(primary.provider.clone(), primary.source_path.clone());
    builder.set_session_id(Some(&primary.session_id));
    builder.set_working_dir(primary.working_dir.as_deref());
    if let Some(model) = &primary.model {
        builder.set_model(Some(model), 0);
    }
    builder.record_timestamp(primary.started_at);
    builder.record_timestamp(primary.updated_at);

    builder.ingest_record(primary, 1);
    builder.ingest_record(incoming, 2);

    builder.record_timestamp(incoming.started_at);
    builder.record_timestamp(incoming.updated_at);
    if builder.working_dir().is_none() {
        builder.set_working_dir(incoming.working_dir.as_deref());
    }

    builder
        .build(Some(&primary.session_id))
        .unwrap_or_else(|| primary.clone())
}
