//! Session service: bootstraps from the metadata snapshot cache, coalesces
//! refreshes and direct loads, and exposes query primitives over the result.
//! Built on `transcripts-providers` and `transcripts-cache`; not intended for
//! direct use outside this workspace.

mod cache_key;
mod config;
mod query;
mod service;

pub use config::ServiceConfig;
pub use query::{QueryPage, SessionQuery, SortOrder, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use service::SessionService;
