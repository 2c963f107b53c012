//! Snapshot readers for the three merged sources.
//!
//! Each reader returns `(nested_or_flat_mapping, freshness_token)`. The file
//! reader returns a fully nested mapping (parsed structured text); the
//! dotenv and env readers return a *flat* mapping keyed by the raw,
//! unparsed env key (key-splitting and scalar parsing happen later, during
//! projection — see `projection.rs`).

pub mod dotenv;
pub mod env;
pub mod file;

/// A freshness token used by the source-sync coordinator to short-circuit a
/// re-read when nothing on disk changed. `None` means "always re-read" (the
/// env source has no such token).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreshnessToken {
    /// `(absolute_path, exists, mtime_ns, size)`.
    File { path: String, exists: bool, mtime_ns: i128, size: u64 },
    /// The env source is always considered fresh-to-reread.
    None,
}

impl FreshnessToken {
    pub fn absent(path: &std::path::Path) -> Self {
        FreshnessToken::File {
            path: path.to_string_lossy().to_string(),
            exists: false,
            mtime_ns: 0,
            size: 0,
        }
    }
}

/// Stat a path into a freshness token, tombstoning absent files.
pub fn file_state(path: &std::path::Path) -> FreshnessToken {
    let resolved = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf());
    match std::fs::metadata(&resolved) {
        Ok(meta) => {
            let mtime_ns = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_nanos() as i128)
                .unwrap_or(0);
            FreshnessToken::File {
                path: resolved.to_string_lossy().to_string(),
                exists: true,
                mtime_ns,
                size: meta.len(),
            }
        }
        Err(_) => FreshnessToken::absent(&resolved),
    }
}
