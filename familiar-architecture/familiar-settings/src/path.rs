//! Dotted/tuple-encoded addresses into the nested settings value tree.
//!
//! Grounded on `original_source/.../section_path.py` (dotted splitting) and
//! `key_policy.py` (case policy + reserved-root check).

use crate::error::SettingsError;

/// The reserved control root. Lower-cased spelling per §6 of the spec.
pub const CONTROL_ROOT: &str = "fastapiex";

/// Case comparison policy for path segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasePolicy {
    /// Segments compared byte-for-byte.
    Exact,
    /// Segments compared under case-folding (ASCII lowercase).
    Folded,
}

impl CasePolicy {
    pub fn from_case_sensitive(case_sensitive: bool) -> Self {
        if case_sensitive {
            CasePolicy::Exact
        } else {
            CasePolicy::Folded
        }
    }
}

/// Fold a segment the way this crate folds everywhere: ASCII-oriented
/// `to_lowercase`, matching Python's `str.casefold()` closely enough for the
/// identifiers this runtime deals with (dotted path segments, env keys).
pub fn fold(segment: &str) -> String {
    segment.to_lowercase()
}

pub fn is_control_root(segment: &str) -> bool {
    fold(segment) == CONTROL_ROOT
}

/// An ordered tuple of non-empty string segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path(Vec<String>);

impl Path {
    pub fn new(segments: Vec<String>) -> Self {
        Path(segments)
    }

    pub fn single(segment: impl Into<String>) -> Self {
        Path(vec![segment.into()])
    }

    /// Split a dotted string into a `Path`, rejecting empty segments.
    pub fn from_dotted(raw: &str) -> Result<Self, SettingsError> {
        let parts: Vec<String> = raw.split('.').map(|part| part.trim().to_string()).collect();
        if parts.is_empty() || parts.iter().any(|part| part.is_empty()) {
            return Err(SettingsError::registration(
                raw,
                "invalid section path: segments must be non-empty",
            ));
        }
        Ok(Path(parts))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn is_control_root(&self) -> bool {
        self.first().map(is_control_root).unwrap_or(false)
    }

    /// Render every segment through `fold`, yielding the control-namespace's
    /// canonical casing.
    pub fn folded(&self) -> Path {
        Path(self.0.iter().map(|s| fold(s)).collect())
    }

    pub fn text(&self) -> String {
        self.0.join(".")
    }

    pub fn push(&self, segment: impl Into<String>) -> Path {
        let mut next = self.0.clone();
        next.push(segment.into());
        Path(next)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text())
    }
}

impl From<Vec<String>> for Path {
    fn from(segments: Vec<String>) -> Self {
        Path(segments)
    }
}
