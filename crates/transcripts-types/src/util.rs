//! Timestamp parsing and content-flattening helpers shared by normalization,
//! the domain model's search index, and query normalization.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Strip private-use Unicode characters (U+E000..=U+F8FF) some providers use
/// as citation markers. Applied consistently wherever text is indexed or
/// shown back to a caller.
pub fn strip_private_use(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(*c as u32, 0xE000..=0xF8FF))
        .collect()
}

/// Parse a heterogeneous timestamp value: unix seconds/milliseconds as a
/// JSON number, or an ISO-8601 string (a trailing `Z` is coerced to `+00:00`).
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let mut seconds = n.as_f64()?;
            if seconds > 1e12 {
                seconds /= 1000.0;
            }
            let millis = seconds * 1000.0;
            if !millis.is_finite() {
                return None;
            }
            DateTime::from_timestamp_millis(millis as i64)
        }
        Value::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

/// As [`parse_timestamp`], for a bare string (no JSON wrapper involved).
pub fn parse_timestamp_str(value: &str) -> Option<DateTime<Utc>> {
    let cleaned = value.trim();
    if cleaned.is_empty() {
        return None;
    }
    let coerced = if let Some(stripped) = cleaned.strip_suffix('Z') {
        format!("{stripped}+00:00")
    } else {
        cleaned.to_string()
    };
    DateTime::parse_from_rfc3339(&coerced)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Flatten a JSON content blob from various provider shapes into readable text.
pub fn stringify_content(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Object(map) => {
            for key in ["text", "content", "value"] {
                if let Some(v) = map.get(key) {
                    return stringify_content(v);
                }
            }
            map.values()
                .map(stringify_content)
                .collect::<Vec<_>>()
                .join(" ")
        }
        Value::Array(items) => items
            .iter()
            .map(stringify_content)
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Return the first value that is neither absent nor a blank string.
pub fn coalesce<'a>(values: &[Option<&'a str>]) -> Option<&'a str> {
    values
        .iter()
        .flatten()
        .find(|v| !v.trim().is_empty())
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_private_use_range() {
        let text = "hello\u{E000}world\u{F8FF}!";
        assert_eq!(strip_private_use(text), "helloworld!");
    }

    #[test]
    fn leaves_ordinary_text_untouched() {
        assert_eq!(strip_private_use("plain text"), "plain text");
    }

    #[test]
    fn parses_unix_seconds() {
        let ts = parse_timestamp(&json!(1_700_000_000)).unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }

    #[test]
    fn parses_unix_milliseconds() {
        let ts = parse_timestamp(&json!(1_700_000_000_000i64)).unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }

    #[test]
    fn parses_iso8601_with_trailing_z() {
        let ts = parse_timestamp(&json!("2026-01-13T00:01:00Z")).unwrap();
        assert_eq!(ts.timestamp(), 1_768_262_460);
    }

    #[test]
    fn rejects_unrecognised_strings() {
        assert!(parse_timestamp(&json!("not a date")).is_none());
    }

    #[test]
    fn stringify_prefers_known_keys() {
        let value = json!({"content": "inner", "other": "ignored"});
        assert_eq!(stringify_content(&value), "inner");
    }

    #[test]
    fn stringify_joins_list_items() {
        let value = json!(["a", "b", 3]);
        assert_eq!(stringify_content(&value), "a b 3");
    }

    #[test]
    fn coalesce_skips_blank_and_absent() {
        assert_eq!(coalesce(&[None, Some("  "), Some("value")]), Some("value"));
        assert_eq!(coalesce(&[None, Some("  ")]), None);
    }
}
