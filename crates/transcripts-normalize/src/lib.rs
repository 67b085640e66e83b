//! Provider-agnostic normalization of raw event payloads into
//! [`transcripts_types::NormalizedMessage`]s, plus the ingestion builder and
//! record-merge machinery shared by providers.

mod builder;
mod normalize;

pub use builder::{merge_session_records, SessionBuilder};
pub use normalize::{render_legacy_content, NormalizeOptions, Normalizer};
