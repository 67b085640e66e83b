use sha2::{Digest, Sha256};

/// One `(provider, canonical_source_path) -> (mtime_ns, size)` entry used to
/// decide whether a cached metadata snapshot is still valid.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ManifestEntry {
    pub provider: String,
    pub source_path: String,
    pub mtime_ns: i128,
    pub size: u64,
}

/// The full set of manifest entries built during a refresh.
pub type Manifest = Vec<ManifestEntry>;

/// Sha256 over entries in lexicographic `(provider, source_path)` order, each
/// serialized as `provider\0path\0mtime\0size\n`. Deterministic and
/// order-independent in the input slice.
pub fn manifest_hash(entries: &[ManifestEntry]) -> String {
    let mut sorted: Vec<&ManifestEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| (&a.provider, &a.source_path).cmp(&(&b.provider, &b.source_path)));

    let mut hasher = Sha256::new();
    for entry in sorted {
        hasher.update(entry.provider.as_bytes());
        hasher.update(b"\0");
        hasher.update(entry.source_path.as_bytes());
        hasher.update(b"\0");
        hasher.update(entry.mtime_ns.to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(entry.size.to_string().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}
