//! Cache directory resolution and path fingerprinting shared by both cache
//! tiers.

use std::path::{Path, PathBuf};

pub const WORKSPACE_CACHE_DIRNAME: &str = ".agent-sessions-cache";

const CACHE_DIR_ENV: &str = "AGENT_SESSIONS_CACHE_DIR";
const NO_CACHE_ENV: &str = "AGENT_SESSIONS_NO_CACHE";
const XDG_CACHE_HOME_ENV: &str = "XDG_CACHE_HOME";

fn env_truthy(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

pub fn cache_disabled() -> bool {
    env_truthy(NO_CACHE_ENV)
}

pub fn cache_dir_from_env() -> Option<PathBuf> {
    std::env::var(CACHE_DIR_ENV).ok().map(PathBuf::from)
}

/// XDG_CACHE_HOME on Unix; `~/Library/Caches/agent-sessions` on macOS;
/// `~/.cache/agent-sessions` otherwise.
pub fn default_cache_dir() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var(XDG_CACHE_HOME_ENV) {
        let trimmed = xdg.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed).join("agent-sessions"));
        }
    }
    let home = dirs::home_dir()?;
    if cfg!(target_os = "macos") {
        Some(home.join("Library").join("Caches").join("agent-sessions"))
    } else {
        Some(home.join(".cache").join("agent-sessions"))
    }
}

/// Ordered, deduplicated candidate directories for the metadata snapshot
/// cache: an explicit override, the platform default, then a workspace-local
/// fallback so a read-only home directory doesn't strand every project.
pub fn metadata_cache_dir_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(dir) = cache_dir_from_env() {
        candidates.push(dir);
    }
    if let Some(dir) = default_cache_dir() {
        candidates.push(dir);
    }
    candidates.push(PathBuf::from(".").join(WORKSPACE_CACHE_DIRNAME));

    let mut seen = std::collections::HashSet::new();
    candidates.retain(|dir| {
        let normalized = normalize(dir);
        seen.insert(normalized)
    });
    candidates
}

fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// `(mtime_ns, size)` fingerprint used to decide cache freshness. `None` when
/// the path cannot be stat'd (removed, permission denied, etc.).
pub fn path_fingerprint(path: &Path) -> Option<(i128, u64)> {
    let metadata = std::fs::metadata(path).ok()?;
    let modified = metadata.modified().ok()?;
    let mtime_ns = modified
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .as_nanos() as i128;
    Some((mtime_ns, metadata.len()))
}

/// Serialize to a `.tmp` sibling then rename into place, so a concurrent
/// reader never observes a partially written file.
pub fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_truthy_accepts_common_spellings() {
        for value in ["1", "true", "YES", "On"] {
            unsafe {
                std::env::set_var(NO_CACHE_ENV, value);
            }
            assert!(cache_disabled());
        }
        unsafe {
            std::env::remove_var(NO_CACHE_ENV);
        }
        assert!(!cache_disabled());
    }

    #[test]
    fn atomic_write_produces_readable_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("payload.json");
        atomic_write(&path, b"{\"a\":1}").unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "{\"a\":1}");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn fingerprint_reflects_size() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"hello").unwrap();
        let (_, size) = path_fingerprint(&path).unwrap();
        assert_eq!(size, 5);
    }

    #[test]
    fn fingerprint_none_for_missing_path() {
        assert!(path_fingerprint(Path::new("/nonexistent/path/xyz")).is_none());
    }
}
