use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Iterate a JSONL file's records, tolerating unreadable lines.
///
/// A line that fails to parse is dropped and counted by the caller's
/// normalizer, not this reader; a file that cannot be opened yields no
/// events at all.
pub struct JsonlReader {
    lines: Option<std::io::Lines<BufReader<File>>>,
    path: PathBuf,
}

impl JsonlReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lines = File::open(&path).ok().map(|f| BufReader::new(f).lines());
        if lines.is_none() {
            debug!(path = %path.display(), "unable to open jsonl file");
        }
        Self { lines, path }
    }
}

impl Iterator for JsonlReader {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        let lines = self.lines.as_mut()?;
        loop {
            let raw = match lines.next() {
                Some(Ok(line)) => line,
                Some(Err(err)) => {
                    debug!(path = %self.path.display(), error = %err, "error reading jsonl line");
                    return None;
                }
                None => return None,
            };
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(value @ Value::Object(_)) => return Some(value),
                Ok(_) => continue,
                Err(err) => {
                    debug!(path = %self.path.display(), error = %err, "discarding invalid json line");
                    continue;
                }
            }
        }
    }
}

/// Recursively enumerate files under `root` whose extension matches one of
/// `extensions`, sorted by path. Mirrors the directory layouts providers
/// actually use (`sessions/<y>/<m>/<d>/*.jsonl`, `projects/*/**/*.jsonl`)
/// without needing literal glob syntax.
pub fn iter_files_with_extension(root: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    if !root.exists() {
        return Vec::new();
    }
    let mut out: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.contains(&ext))
        })
        .collect();
    out.sort();
    out
}
