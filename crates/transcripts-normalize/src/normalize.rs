//! Provider-agnostic event normalization: turn one opaque event payload into
//! at most one [`NormalizedMessage`], tracking per-source diagnostics.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sha1::{Digest, Sha1};
use transcripts_types::{
    NormalizationDiagnostics, NormalizedMessage, NormalizedPart, NormalizedRole,
};

fn role_alias(lowered: &str) -> Option<NormalizedRole> {
    match lowered {
        "system" | "developer" => Some(NormalizedRole::System),
        "user" | "human" => Some(NormalizedRole::User),
        "assistant" | "ai" | "model" | "gemini" => Some(NormalizedRole::Assistant),
        "tool" | "function" => Some(NormalizedRole::Tool),
        _ => None,
    }
}

/// Per-call overrides a provider can supply when it already knows more than
/// the raw payload exposes (e.g. a timestamp parsed from a sibling field).
#[derive(Debug, Clone, Default)]
pub struct NormalizeOptions {
    pub timestamp: Option<DateTime<Utc>>,
    pub role: Option<String>,
    pub name: Option<String>,
    pub latency_ms: Option<f64>,
    pub provider_meta: Option<Value>,
    pub message_id: Option<String>,
}

/// Stateful normalizer for one provider's event stream: owns the running
/// [`NormalizationDiagnostics`] and the monotonic sequence counter that
/// disambiguates otherwise-identical stable IDs within a single pass.
#[derive(Debug)]
pub struct Normalizer {
    provider: String,
    diagnostics: NormalizationDiagnostics,
    sequence: u64,
}

impl Normalizer {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            diagnostics: NormalizationDiagnostics::default(),
            sequence: 0,
        }
    }

    pub fn diagnostics(&self) -> &NormalizationDiagnostics {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> NormalizationDiagnostics {
        self.diagnostics
    }

    fn next_sequence(&mut self) -> u64 {
        let value = self.sequence;
        self.sequence += 1;
        value
    }

    /// Normalize one payload. Returns `None` when no parts could be
    /// extracted; diagnostics are updated either way.
    pub fn normalize_message(
        &mut self,
        payload: &Value,
        opts: NormalizeOptions,
    ) -> Option<NormalizedMessage> {
        self.diagnostics.total_events += 1;
        let Value::Object(obj) = payload else {
            self.diagnostics.skipped_events += 1;
            return None;
        };

        let extracted_role = extract_role(obj, opts.role.as_deref());
        let extracted_name = extract_name(obj, opts.name.as_deref());
        let extracted_latency = extract_latency_ms(obj, opts.latency_ms);
        let extracted_timestamp = opts.timestamp.or_else(|| extract_timestamp(obj));

        let mut parts = Vec::new();
        parts.extend(parts_from_content(extract_content(obj)));
        parts.extend(parts_from_openai_tool_calls(obj));
        parts.extend(parts_from_openai_function_call(obj));
        parts.extend(parts_from_gemini_function(obj));
        parts.extend(parts_from_tool_result_payload(obj));

        let parts = compact_parts(parts);
        if parts.is_empty() {
            self.diagnostics.skipped_events += 1;
            return None;
        }

        let normalized_role = resolve_role(extracted_role.as_deref(), &parts);
        if let Some(role) = &extracted_role {
            let lowered = role.trim().to_lowercase();
            if (lowered == "user" || lowered == "human") && normalized_role == NormalizedRole::Tool
            {
                let warning = format!("{}: role override '{}' -> 'tool'", self.provider, role);
                tracing::debug!(provider = %self.provider, original_role = %role, "{warning}");
                self.diagnostics.warnings.push(warning);
            }
        }

        let msg_id = clean_str(opts.message_id.as_deref())
            .map(str::to_string)
            .or_else(|| {
                obj.get("id")
                    .and_then(Value::as_str)
                    .and_then(|s| clean_str(Some(s)))
                    .map(str::to_string)
            })
            .unwrap_or_else(|| {
                let sequence = self.next_sequence();
                stable_message_id(
                    &self.provider,
                    normalized_role,
                    extracted_timestamp,
                    &parts,
                    sequence,
                )
            });

        self.diagnostics.parsed_events += 1;
        Some(NormalizedMessage {
            id: msg_id,
            role: normalized_role,
            name: extracted_name,
            timestamp: extracted_timestamp,
            parts,
            latency_ms: extracted_latency,
            provider_meta: opts.provider_meta,
        })
    }
}

/// Render a [`NormalizedMessage`] into one readable legacy string. Also the
/// dedup-key input for normalized messages in the ingestion builder.
pub fn render_legacy_content(message: &NormalizedMessage) -> String {
    let mut chunks = Vec::new();
    for part in &message.parts {
        match part {
            NormalizedPart::Text { text } if !text.is_empty() => chunks.push(text.clone()),
            NormalizedPart::Code { text, language } if !text.is_empty() => {
                let lang = language.as_deref().unwrap_or("");
                let fence = format!("```{lang}").trim_end().to_string();
                chunks.push(format!("{fence}\n{text}\n```"));
            }
            NormalizedPart::ToolCall { tool_name, arguments, .. } => {
                let name = tool_name.as_deref().unwrap_or("tool");
                let args = safe_json(arguments.as_ref());
                chunks.push(format!("[tool-call] {name} {args}").trim().to_string());
            }
            NormalizedPart::ToolResult { tool_name, output, .. } => {
                let name = tool_name.as_deref().unwrap_or("tool");
                let out = safe_json(output.as_ref());
                chunks.push(format!("[tool-result] {name} {out}").trim().to_string());
            }
            _ => {}
        }
    }
    chunks
        .into_iter()
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn extract_content(payload: &Map<String, Value>) -> Option<&Value> {
    if let Some(v) = payload.get("content") {
        return Some(v);
    }
    if let Some(v) = payload.get("parts") {
        return Some(v);
    }
    if let Some(Value::Object(nested)) = payload.get("message") {
        if nested.contains_key("content") {
            return nested.get("content");
        }
        if nested.contains_key("parts") {
            return nested.get("parts");
        }
    }
    None
}

fn extract_role(payload: &Map<String, Value>, override_role: Option<&str>) -> Option<String> {
    if let Some(r) = clean_str(override_role) {
        return Some(r.to_string());
    }
    for key in ["role", "author", "speaker", "sender", "type"] {
        if let Some(value) = payload.get(key).and_then(value_as_display_str) {
            if clean_str(Some(&value)).is_some() {
                return Some(value);
            }
        }
    }
    if let Some(Value::Object(message)) = payload.get("message") {
        let value = message
            .get("role")
            .or_else(|| message.get("type"))
            .and_then(value_as_display_str);
        if let Some(value) = value {
            if clean_str(Some(&value)).is_some() {
                return Some(value);
            }
        }
    }
    None
}

fn extract_name(payload: &Map<String, Value>, override_name: Option<&str>) -> Option<String> {
    if let Some(n) = clean_str(override_name) {
        return Some(n.trim().to_string());
    }
    for key in ["name", "tool_name"] {
        if let Some(value) = payload.get(key).and_then(value_as_display_str) {
            if clean_str(Some(&value)).is_some() {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

fn extract_latency_ms(payload: &Map<String, Value>, override_latency: Option<f64>) -> Option<f64> {
    if override_latency.is_some() {
        return override_latency;
    }
    for key in ["latency_ms", "latencyMs", "duration_ms", "durationMs"] {
        if let Some(value) = payload.get(key).and_then(Value::as_f64) {
            return Some(value);
        }
    }
    None
}

/// Best-effort only: providers are expected to parse timestamps themselves
/// (see `transcripts_types::util::parse_timestamp`) and pass the result in
/// via [`NormalizeOptions::timestamp`]; raw JSON payloads never carry an
/// already-parsed instant, so this mirrors the source's no-op fallback.
fn extract_timestamp(_payload: &Map<String, Value>) -> Option<DateTime<Utc>> {
    None
}

fn resolve_role(role: Option<&str>, parts: &[NormalizedPart]) -> NormalizedRole {
    let lowered = role.unwrap_or("").trim().to_lowercase();
    let base = role_alias(&lowered);

    let has_tool_result = parts.iter().any(NormalizedPart::is_tool_result);
    let has_tool_call = parts.iter().any(NormalizedPart::is_tool_call);

    if has_tool_result {
        return NormalizedRole::Tool;
    }
    if let Some(base) = base {
        return base;
    }
    if has_tool_call {
        return NormalizedRole::Assistant;
    }
    // Default to assistant to avoid mis-attributing provider event noise as
    // user messages (see SPEC_FULL.md §9, open question).
    NormalizedRole::Assistant
}

fn parts_from_content(content: Option<&Value>) -> Vec<NormalizedPart> {
    let Some(content) = content else {
        return Vec::new();
    };
    match content {
        Value::String(s) => {
            let text = s.trim();
            if text.is_empty() {
                Vec::new()
            } else {
                vec![NormalizedPart::text_part(text)]
            }
        }
        Value::Object(item) => parts_from_content_dict(item),
        Value::Array(items) => items.iter().flat_map(|i| parts_from_content(Some(i))).collect(),
        other => {
            let text = transcripts_types::util::stringify_content(other);
            let text = text.trim();
            if text.is_empty() {
                Vec::new()
            } else {
                vec![NormalizedPart::text_part(text)]
            }
        }
    }
}

fn parts_from_content_dict(item: &Map<String, Value>) -> Vec<NormalizedPart> {
    let kind = item
        .get("type")
        .or_else(|| item.get("kind"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_lowercase();

    match kind.as_str() {
        "text" | "input_text" | "output_text" => {
            let text = first_str(item, &["text", "content", "value"]).unwrap_or_default();
            let text = text.trim();
            if text.is_empty() {
                Vec::new()
            } else {
                vec![NormalizedPart::text_part(text)]
            }
        }
        "code" | "input_code" | "output_code" => {
            let text = first_str(item, &["text", "code", "content"]).unwrap_or_default();
            let text = text.trim();
            if text.is_empty() {
                return Vec::new();
            }
            let language = first_str(item, &["language", "lang"]).map(|s| s.trim().to_string());
            vec![NormalizedPart::code_part(text, language)]
        }
        "tool_use" | "tool-call" | "tool_call" | "function_call" => {
            let tool_name = first_str(item, &["name", "tool_name", "tool"])
                .map(|s| s.trim().to_string());
            let args = item
                .get("input")
                .or_else(|| item.get("arguments"))
                .or_else(|| item.get("args"))
                .cloned();
            let call_id = item.get("id").and_then(Value::as_str).map(|s| s.trim().to_string());
            vec![NormalizedPart::tool_call_part(tool_name, args, call_id)]
        }
        "tool_result" | "tool-result" | "tool_output" | "function_response" => {
            let tool_name = first_str(item, &["name", "tool_name", "tool"])
                .map(|s| s.trim().to_string());
            let output = item
                .get("output")
                .or_else(|| item.get("content"))
                .or_else(|| item.get("result"))
                .cloned();
            let call_id = first_str(item, &["tool_use_id", "id"]).map(|s| s.trim().to_string());
            vec![NormalizedPart::tool_result_part(tool_name, output, call_id)]
        }
        _ => {
            if let Some(Value::Object(call)) = item.get("functionCall") {
                let tool_name = call.get("name").and_then(Value::as_str).map(str::to_string);
                let args = call.get("args").or_else(|| call.get("arguments")).cloned();
                return vec![NormalizedPart::tool_call_part(tool_name, args, None)];
            }
            if let Some(Value::Object(resp)) = item.get("functionResponse") {
                let tool_name = resp.get("name").and_then(Value::as_str).map(str::to_string);
                let output = resp.get("response").or_else(|| resp.get("output")).cloned();
                return vec![NormalizedPart::tool_result_part(tool_name, output, None)];
            }
            if let Some(text) = item.get("text").and_then(Value::as_str) {
                if clean_str(Some(text)).is_some() {
                    return vec![NormalizedPart::text_part(text.trim())];
                }
            }
            let text = transcripts_types::util::stringify_content(&Value::Object(item.clone()));
            let text = text.trim();
            if text.is_empty() {
                Vec::new()
            } else {
                vec![NormalizedPart::text_part(text)]
            }
        }
    }
}

fn parts_from_openai_tool_calls(payload: &Map<String, Value>) -> Vec<NormalizedPart> {
    let Some(Value::Array(calls)) = payload.get("tool_calls") else {
        return Vec::new();
    };
    let mut parts = Vec::new();
    for call in calls {
        let Value::Object(call) = call else { continue };
        let call_id = call.get("id").and_then(Value::as_str).map(|s| s.trim().to_string());
        let function = call.get("function").and_then(Value::as_object);
        let tool_name = function
            .and_then(|f| f.get("name"))
            .or_else(|| call.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let args_raw = function
            .and_then(|f| f.get("arguments"))
            .or_else(|| call.get("arguments"));
        let args = resolve_maybe_json_arg(args_raw);
        parts.push(NormalizedPart::tool_call_part(tool_name, args, call_id));
    }
    parts
}

fn parts_from_openai_function_call(payload: &Map<String, Value>) -> Vec<NormalizedPart> {
    let Some(Value::Object(call)) = payload.get("function_call") else {
        return Vec::new();
    };
    let tool_name = call.get("name").and_then(Value::as_str).map(str::to_string);
    let args = resolve_maybe_json_arg(call.get("arguments"));
    if tool_name.is_none() && args.is_none() {
        return Vec::new();
    }
    vec![NormalizedPart::tool_call_part(tool_name, args, None)]
}

fn parts_from_gemini_function(payload: &Map<String, Value>) -> Vec<NormalizedPart> {
    if let Some(Value::Object(call)) = payload.get("functionCall") {
        let tool_name = call.get("name").and_then(Value::as_str).map(str::to_string);
        let args = call.get("args").or_else(|| call.get("arguments")).cloned();
        return vec![NormalizedPart::tool_call_part(tool_name, args, None)];
    }
    if let Some(Value::Object(resp)) = payload.get("functionResponse") {
        let tool_name = resp.get("name").and_then(Value::as_str).map(str::to_string);
        let output = resp.get("response").or_else(|| resp.get("output")).cloned();
        return vec![NormalizedPart::tool_result_part(tool_name, output, None)];
    }
    Vec::new()
}

fn parts_from_tool_result_payload(payload: &Map<String, Value>) -> Vec<NormalizedPart> {
    let kind = payload
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_lowercase();
    if !matches!(kind.as_str(), "tool_result" | "tool-result" | "tool_output" | "tool-output") {
        return Vec::new();
    }
    let tool_name = first_str(payload, &["tool_name", "name"]).map(|s| s.trim().to_string());
    let output = payload
        .get("output")
        .or_else(|| payload.get("content"))
        .or_else(|| payload.get("result"))
        .cloned();
    let call_id = first_str(payload, &["tool_use_id", "id"]).map(|s| s.trim().to_string());
    if tool_name.is_none() && output.is_none() {
        return Vec::new();
    }
    vec![NormalizedPart::tool_result_part(tool_name, output, call_id)]
}

fn compact_parts(parts: Vec<NormalizedPart>) -> Vec<NormalizedPart> {
    parts
        .into_iter()
        .filter_map(|part| match part {
            NormalizedPart::Text { text } => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(NormalizedPart::text_part(trimmed))
                }
            }
            NormalizedPart::Code { text, language } => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(NormalizedPart::code_part(trimmed, language))
                }
            }
            other => Some(other),
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn stable_message_id(
    provider: &str,
    role: NormalizedRole,
    timestamp: Option<DateTime<Utc>>,
    parts: &[NormalizedPart],
    sequence: u64,
) -> String {
    let mut hasher = Sha1::new();
    hasher.update(provider.as_bytes());
    hasher.update(b"\0");
    hasher.update(role.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(
        timestamp
            .map(|t| t.to_rfc3339())
            .unwrap_or_default()
            .as_bytes(),
    );
    hasher.update(b"\0");
    for part in parts {
        hasher.update(part.kind().as_bytes());
        hasher.update(b"\0");
        hasher.update(part.text().unwrap_or("").as_bytes());
        hasher.update(b"\0");
        hasher.update(part.language().unwrap_or("").as_bytes());
        hasher.update(b"\0");
        hasher.update(part.tool_name().unwrap_or("").as_bytes());
        hasher.update(b"\0");
        hasher.update(safe_json(part.arguments()).as_bytes());
        hasher.update(b"\0");
        hasher.update(safe_json(part.output()).as_bytes());
        hasher.update(b"\0");
        hasher.update(part.id().unwrap_or("").as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(sequence.to_string().as_bytes());
    format!("{}:{:x}", provider, hasher.finalize())
}

fn safe_json(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// A tool-call argument string shaped like a JSON object/array is
/// opportunistically parsed; non-JSON strings (and non-string values) pass
/// through unchanged.
fn resolve_maybe_json_arg(value: Option<&Value>) -> Option<Value> {
    match value {
        Some(Value::String(s)) => Some(maybe_json(s).unwrap_or_else(|| Value::String(s.clone()))),
        other => other.cloned(),
    }
}

fn maybe_json(value: &str) -> Option<Value> {
    let stripped = value.trim();
    if !(stripped.starts_with('{') || stripped.starts_with('[')) {
        return None;
    }
    serde_json::from_str(stripped).ok()
}

fn clean_str(value: Option<&str>) -> Option<&str> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn first_str<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| map.get(*key).and_then(Value::as_str))
}

fn value_as_display_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_text_message_resolves_user_role() {
        let mut normalizer = Normalizer::new("codex");
        let payload = json!({"role": "user", "content": "hello there"});
        let msg = normalizer.normalize_message(&payload, NormalizeOptions::default()).unwrap();
        assert_eq!(msg.role, NormalizedRole::User);
        assert_eq!(msg.parts.len(), 1);
        assert_eq!(msg.parts[0].text(), Some("hello there"));
    }

    #[test]
    fn unparseable_payload_is_skipped() {
        let mut normalizer = Normalizer::new("codex");
        let msg = normalizer.normalize_message(&json!("not an object"), NormalizeOptions::default());
        assert!(msg.is_none());
        assert_eq!(normalizer.diagnostics().skipped_events, 1);
        assert_eq!(normalizer.diagnostics().total_events, 1);
    }

    #[test]
    fn empty_content_is_skipped() {
        let mut normalizer = Normalizer::new("codex");
        let payload = json!({"role": "user", "content": "   "});
        let msg = normalizer.normalize_message(&payload, NormalizeOptions::default());
        assert!(msg.is_none());
        assert_eq!(normalizer.diagnostics().skipped_events, 1);
    }

    #[test]
    fn tool_result_forces_tool_role_and_warns() {
        let mut normalizer = Normalizer::new("claude");
        let payload = json!({
            "role": "user",
            "content": [{"type": "tool_result", "tool_name": "read_file", "output": {"path": "a.txt"}}],
        });
        let msg = normalizer.normalize_message(&payload, NormalizeOptions::default()).unwrap();
        assert_eq!(msg.role, NormalizedRole::Tool);
        assert_eq!(msg.parts.len(), 1);
        assert_eq!(msg.parts[0].tool_name(), Some("read_file"));
        assert!(normalizer
            .diagnostics()
            .warnings
            .iter()
            .any(|w| w.contains("role override")));
    }

    #[test]
    fn openai_tool_calls_parse_json_arguments() {
        let mut normalizer = Normalizer::new("codex");
        let payload = json!({
            "role": "assistant",
            "tool_calls": [{"id": "call_1", "function": {"name": "shell", "arguments": "{\"cmd\":\"ls\"}"}}],
        });
        let msg = normalizer.normalize_message(&payload, NormalizeOptions::default()).unwrap();
        assert_eq!(msg.role, NormalizedRole::Assistant);
        let part = &msg.parts[0];
        assert_eq!(part.tool_name(), Some("shell"));
        assert_eq!(part.arguments(), Some(&json!({"cmd": "ls"})));
    }

    #[test]
    fn gemini_function_call_recognized() {
        let mut normalizer = Normalizer::new("gemini");
        let payload = json!({"functionCall": {"name": "search", "args": {"q": "rust"}}});
        let msg = normalizer.normalize_message(&payload, NormalizeOptions::default()).unwrap();
        assert_eq!(msg.role, NormalizedRole::Assistant);
        assert_eq!(msg.parts[0].tool_name(), Some("search"));
    }

    #[test]
    fn stable_ids_are_deterministic_for_identical_input() {
        let mut a = Normalizer::new("codex");
        let mut b = Normalizer::new("codex");
        let payload = json!({"role": "user", "content": "same text"});
        let msg_a = a.normalize_message(&payload, NormalizeOptions::default()).unwrap();
        let msg_b = b.normalize_message(&payload, NormalizeOptions::default()).unwrap();
        assert_eq!(msg_a.id, msg_b.id);
    }

    #[test]
    fn sequence_disambiguates_identical_payloads_in_one_pass() {
        let mut normalizer = Normalizer::new("codex");
        let payload = json!({"role": "user", "content": "same text"});
        let first = normalizer.normalize_message(&payload, NormalizeOptions::default()).unwrap();
        let second = normalizer.normalize_message(&payload, NormalizeOptions::default()).unwrap();
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn render_legacy_content_covers_all_part_kinds() {
        let msg = NormalizedMessage {
            id: "x".into(),
            role: NormalizedRole::Assistant,
            parts: vec![
                NormalizedPart::text_part("hi"),
                NormalizedPart::code_part("let x = 1;", Some("rust".into())),
                NormalizedPart::tool_call_part(Some("shell".into()), Some(json!({"cmd": "ls"})), None),
                NormalizedPart::tool_result_part(Some("shell".into()), Some(json!({"out": "a"})), None),
            ],
            name: None,
            timestamp: None,
            latency_ms: None,
            provider_meta: None,
        };
        let rendered = render_legacy_content(&msg);
        assert!(rendered.contains("hi"));
        assert!(rendered.contains("```rust\nlet x = 1;\n```"));
        assert!(rendered.contains("[tool-call] shell"));
        assert!(rendered.contains("[tool-result] shell"));
    }
}
