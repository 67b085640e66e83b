//! Filtering, ordering, and pagination over an in-memory session list.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::str::FromStr;
use transcripts_types::SessionRecord;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 500;

/// Sort key, always applied descending (most recent / largest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    UpdatedAt,
    StartedAt,
    MessageCount,
}

impl FromStr for SortOrder {
    type Err = std::convert::Infallible;

    /// An unrecognized value falls back to `UpdatedAt` rather than erroring —
    /// query validation is advisory, not a hard failure mode.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(match raw.trim().to_lowercase().as_str() {
            "started_at" | "started-at" | "startedat" => SortOrder::StartedAt,
            "message_count" | "messages" | "message-count" => SortOrder::MessageCount,
            _ => SortOrder::UpdatedAt,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionQuery {
    pub providers: Vec<String>,
    pub search: String,
    pub model_exact: Vec<String>,
    pub model_prefixes: Vec<String>,
    pub model_provider: Option<String>,
    pub order: SortOrder,
    pub page: usize,
    pub page_size: usize,
    pub include_working_dirs: Vec<String>,
    pub exclude_working_dirs: Vec<String>,
}

impl SessionQuery {
    /// Trims and lowercases free-text fields, drops empties, lets an explicit
    /// include win over a conflicting exclude, clamps paging to sane bounds.
    /// Idempotent — normalizing twice produces the same query.
    pub fn normalize(&mut self) {
        self.search = transcripts_types::util::strip_private_use(self.search.trim()).to_lowercase();

        lower_dedup(&mut self.providers);
        lower_dedup(&mut self.model_exact);
        lower_dedup(&mut self.model_prefixes);
        self.model_provider = self
            .model_provider
            .take()
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty());

        trim_dedup(&mut self.include_working_dirs);
        trim_dedup(&mut self.exclude_working_dirs);
        let included: HashSet<String> = self.include_working_dirs.iter().cloned().collect();
        self.exclude_working_dirs.retain(|dir| !included.contains(dir));

        if self.page == 0 {
            self.page = 1;
        }
        self.page_size = match self.page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
    }
}

fn lower_dedup(values: &mut Vec<String>) {
    let mut seen = HashSet::new();
    values.retain_mut(|v| {
        *v = v.trim().to_lowercase();
        !v.is_empty() && seen.insert(v.clone())
    });
}

fn trim_dedup(values: &mut Vec<String>) {
    let mut seen = HashSet::new();
    values.retain_mut(|v| {
        *v = v.trim().to_string();
        !v.is_empty() && seen.insert(v.clone())
    });
}

#[derive(Debug, Clone)]
pub struct QueryPage {
    pub items: Vec<SessionRecord>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub total_pages: usize,
    pub has_previous: bool,
    pub has_next: bool,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Timestamp(Option<DateTime<Utc>>),
    Count(usize),
}

fn sort_key(record: &SessionRecord, order: SortOrder) -> SortKey {
    match order {
        SortOrder::UpdatedAt => SortKey::Timestamp(record.updated_at.or(record.started_at)),
        SortOrder::StartedAt => SortKey::Timestamp(record.started_at.or(record.updated_at)),
        SortOrder::MessageCount => SortKey::Count(record.message_count()),
    }
}

fn matches(record: &mut SessionRecord, query: &SessionQuery) -> bool {
    if !query.providers.is_empty() {
        let provider = record.provider.to_lowercase();
        if !query.providers.iter().any(|p| *p == provider) {
            return false;
        }
    }

    match &record.working_dir {
        Some(dir) => {
            if !query.include_working_dirs.is_empty() && !query.include_working_dirs.iter().any(|d| d == dir) {
                return false;
            }
            if query.exclude_working_dirs.iter().any(|d| d == dir) {
                return false;
            }
        }
        None if !query.include_working_dirs.is_empty() => return false,
        None => {}
    }

    let model_lower = record.model.as_deref().map(str::to_lowercase);
    if !query.model_exact.is_empty() {
        let hit = matches!(&model_lower, Some(m) if query.model_exact.iter().any(|e| e == m));
        if !hit {
            return false;
        }
    }
    if !query.model_prefixes.is_empty() {
        let hit = matches!(&model_lower, Some(m) if query.model_prefixes.iter().any(|p| m.starts_with(p.as_str())));
        if !hit {
            return false;
        }
    }
    if let Some(provider) = &query.model_provider {
        let hit = matches!(&model_lower, Some(m) if model_namespace(m) == Some(provider.as_str()));
        if !hit {
            return false;
        }
    }

    if !query.search.is_empty() && !record.search_index().matches(&query.search) {
        return false;
    }

    true
}

/// Pulls the namespace off a `provider/model` or `provider:model` style
/// identifier, the two separators observed across provider model strings.
fn model_namespace(model: &str) -> Option<&str> {
    model.split(['/', ':']).next().filter(|s| !s.is_empty())
}

/// Filters, sorts, and paginates in place. `query` is cloned and normalized
/// internally so callers never need to normalize before calling.
pub fn run(sessions: &mut [SessionRecord], query: &SessionQuery) -> QueryPage {
    let mut query = query.clone();
    query.normalize();

    let flags: Vec<bool> = sessions.iter_mut().map(|r| matches(r, &query)).collect();
    let mut indices: Vec<usize> = flags.iter().enumerate().filter(|(_, hit)| **hit).map(|(i, _)| i).collect();
    indices.sort_by(|&a, &b| sort_key(&sessions[b], query.order).cmp(&sort_key(&sessions[a], query.order)));

    let total = indices.len();
    let total_pages = if total == 0 { 0 } else { total.div_ceil(query.page_size) };
    let page = if total_pages == 0 { 1 } else { query.page.min(total_pages) };
    let start = ((page - 1) * query.page_size).min(total);
    let end = (start + query.page_size).min(total);
    let items = indices[start..end].iter().map(|&i| sessions[i].clone()).collect();

    QueryPage {
        items,
        page,
        page_size: query.page_size,
        total,
        total_pages,
        has_previous: page > 1,
        has_next: page < total_pages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(id: &str, provider: &str, updated_at: Option<DateTime<Utc>>) -> SessionRecord {
        SessionRecord::new(
            provider,
            id,
            PathBuf::from(format!("/tmp/{id}.jsonl")),
            None,
            updated_at,
            Some("/work/repo".to_string()),
            Some("anthropic/claude-3".to_string()),
            vec![],
            vec![],
            None,
        )
    }

    fn ts(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(seconds, 0).unwrap()
    }

    #[test]
    fn pagination_boundary_reports_one_item_with_no_next_page() {
        let mut sessions = vec![
            record("a", "codex", Some(ts(1))),
            record("b", "codex", Some(ts(2))),
            record("c", "codex", Some(ts(3))),
        ];
        let query = SessionQuery {
            page: 2,
            page_size: 2,
            ..Default::default()
        };
        let page = run(&mut sessions, &query);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert!(page.has_previous);
        assert!(!page.has_next);
        assert_eq!(page.items[0].session_id, "a");
    }

    #[test]
    fn provider_filter_is_case_insensitive() {
        let mut sessions = vec![record("a", "Codex", Some(ts(1)))];
        let query = SessionQuery {
            providers: vec!["CODEX".to_string()],
            ..Default::default()
        };
        assert_eq!(run(&mut sessions, &query).total, 1);
    }

    #[test]
    fn include_working_dir_wins_over_conflicting_exclude() {
        let mut sessions = vec![record("a", "codex", Some(ts(1)))];
        let query = SessionQuery {
            include_working_dirs: vec!["/work/repo".to_string()],
            exclude_working_dirs: vec!["/work/repo".to_string()],
            ..Default::default()
        };
        assert_eq!(run(&mut sessions, &query).total, 1);
    }

    #[test]
    fn model_provider_matches_namespace_prefix() {
        let mut sessions = vec![record("a", "codex", Some(ts(1)))];
        let query = SessionQuery {
            model_provider: Some("anthropic".to_string()),
            ..Default::default()
        };
        assert_eq!(run(&mut sessions, &query).total, 1);
    }

    #[test]
    fn empty_query_sorts_by_updated_at_descending() {
        let mut sessions = vec![
            record("old", "codex", Some(ts(1))),
            record("new", "codex", Some(ts(5))),
        ];
        let page = run(&mut sessions, &SessionQuery::default());
        assert_eq!(page.items[0].session_id, "new");
        assert_eq!(page.items[1].session_id, "old");
    }

    #[test]
    fn unknown_order_falls_back_to_updated_at() {
        assert_eq!("bogus".parse::<SortOrder>().unwrap(), SortOrder::UpdatedAt);
    }
}
