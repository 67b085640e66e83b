use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The legacy single-string representation of a chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        let role = role.into();
        Self {
            role: if role.is_empty() {
                "event".to_string()
            } else {
                role
            },
            content: content.into(),
            created_at: None,
        }
    }
}

/// Canonical role a [`NormalizedMessage`] is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizedRole {
    System,
    User,
    Assistant,
    Tool,
}

impl NormalizedRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizedRole::System => "system",
            NormalizedRole::User => "user",
            NormalizedRole::Assistant => "assistant",
            NormalizedRole::Tool => "tool",
        }
    }
}

/// One structured chunk of a [`NormalizedMessage`].
///
/// Invariant: text/code parts carry non-empty trimmed `text`; tool-call and
/// tool-result parts carry at least one of `tool_name`, `arguments`, `output`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum NormalizedPart {
    Text {
        text: String,
    },
    Code {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    ToolCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    ToolResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl NormalizedPart {
    pub fn text_part(text: impl Into<String>) -> Self {
        NormalizedPart::Text { text: text.into() }
    }

    pub fn code_part(text: impl Into<String>, language: Option<String>) -> Self {
        NormalizedPart::Code {
            text: text.into(),
            language,
        }
    }

    pub fn tool_call_part(
        tool_name: Option<String>,
        arguments: Option<Value>,
        id: Option<String>,
    ) -> Self {
        NormalizedPart::ToolCall {
            tool_name,
            arguments,
            id,
        }
    }

    pub fn tool_result_part(
        tool_name: Option<String>,
        output: Option<Value>,
        id: Option<String>,
    ) -> Self {
        NormalizedPart::ToolResult {
            tool_name,
            output,
            id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NormalizedPart::Text { .. } => "text",
            NormalizedPart::Code { .. } => "code",
            NormalizedPart::ToolCall { .. } => "tool-call",
            NormalizedPart::ToolResult { .. } => "tool-result",
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            NormalizedPart::Text { text } | NormalizedPart::Code { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn language(&self) -> Option<&str> {
        match self {
            NormalizedPart::Code { language, .. } => language.as_deref(),
            _ => None,
        }
    }

    pub fn tool_name(&self) -> Option<&str> {
        match self {
            NormalizedPart::ToolCall { tool_name, .. }
            | NormalizedPart::ToolResult { tool_name, .. } => tool_name.as_deref(),
            _ => None,
        }
    }

    pub fn arguments(&self) -> Option<&Value> {
        match self {
            NormalizedPart::ToolCall { arguments, .. } => arguments.as_ref(),
            _ => None,
        }
    }

    pub fn output(&self) -> Option<&Value> {
        match self {
            NormalizedPart::ToolResult { output, .. } => output.as_ref(),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            NormalizedPart::ToolCall { id, .. } | NormalizedPart::ToolResult { id, .. } => {
                id.as_deref()
            }
            _ => None,
        }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self, NormalizedPart::ToolCall { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, NormalizedPart::ToolResult { .. })
    }
}

/// A provider event normalized into a stable-ID message with structured parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub id: String,
    pub role: NormalizedRole,
    pub parts: Vec<NormalizedPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_meta: Option<Value>,
}

/// Counters and warnings accumulated while normalizing one source's events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizationDiagnostics {
    pub total_events: u64,
    pub parsed_events: u64,
    pub skipped_events: u64,
    pub warnings: Vec<String>,
}

impl NormalizationDiagnostics {
    /// Sum counters and concatenate warnings. Per-call idempotence is the
    /// caller's responsibility; merging a diagnostics value with itself
    /// double-counts by design (see SPEC_FULL.md §9).
    pub fn merge(&mut self, incoming: &NormalizationDiagnostics) {
        self.total_events += incoming.total_events;
        self.parsed_events += incoming.parsed_events;
        self.skipped_events += incoming.skipped_events;
        self.warnings.extend(incoming.warnings.iter().cloned());
    }
}
