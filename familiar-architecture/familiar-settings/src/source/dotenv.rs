//! The dotenv loader.
//!
//! Grounded on `original_source/.../loader.py::load_dotenv_overrides`,
//! `find_dotenv_path`. Uses `dotenvy`'s line-level conventions (bare
//! `KEY=VALUE`, optional `export ` prefix) as the tokenizer, with the
//! comment/quote rules of `scalar.rs` layered on top of its raw string
//! output — matching the teacher crate's existing `dotenvy` dependency
//! rather than a hand-rolled `.env` parser.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{Map, Value};

use crate::error::SettingsError;
use crate::scalar::parse_dotenv_value;

use super::{file_state, FreshnessToken};

const DOTENV_FILENAME: &str = ".env";

/// Locate `.env` inside `start_dir`, if present.
pub fn find_dotenv_path(start_dir: &Path) -> Option<PathBuf> {
    let candidate = start_dir.join(DOTENV_FILENAME);
    if candidate.is_file() {
        Some(candidate)
    } else {
        None
    }
}

/// Tokenize `dotenv_path` with `dotenvy`'s own line parser (`export `
/// prefix, quoting, comments) and layer `scalar.rs`'s comment/quote cleanup
/// on top of its raw string output.
fn read_dotenv_entries(dotenv_path: &Path) -> anyhow::Result<Map<String, Value>> {
    let mut overrides = Map::new();
    let entries = dotenvy::from_path_iter(dotenv_path)
        .with_context(|| format!("opening dotenv file {}", dotenv_path.display()))?;
    for entry in entries {
        let (key, raw_value) = entry.with_context(|| format!("parsing dotenv file {}", dotenv_path.display()))?;
        let env_key = key.trim();
        if env_key.is_empty() {
            continue;
        }
        overrides.insert(env_key.to_string(), Value::String(parse_dotenv_value(&raw_value)));
    }
    Ok(overrides)
}

/// Read `.env` in `start_dir` into a flat mapping of raw key -> raw
/// (comment/quote-stripped, not yet scalar-typed) string value.
pub fn load_dotenv_raw(start_dir: &Path) -> Result<(Value, FreshnessToken), SettingsError> {
    let Some(dotenv_path) = find_dotenv_path(start_dir) else {
        return Ok((Value::Object(Map::new()), FreshnessToken::absent(&start_dir.join(DOTENV_FILENAME))));
    };

    let token = file_state(&dotenv_path);
    let overrides = read_dotenv_entries(&dotenv_path).map_err(|err| SettingsError::configuration(format!("{err:#}")))?;
    Ok((Value::Object(overrides), token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_dotenv_yields_empty_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let (value, token) = load_dotenv_raw(dir.path()).unwrap();
        assert_eq!(value, Value::Object(Map::new()));
        assert!(matches!(token, FreshnessToken::File { exists: false, .. }));
    }

    #[test]
    fn parses_export_prefix_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "export APP__NAME=demo # trailing comment\nAPP__DEBUG=true\n",
        )
        .unwrap();
        let (value, _) = load_dotenv_raw(dir.path()).unwrap();
        assert_eq!(value["APP__NAME"], "demo");
        assert_eq!(value["APP__DEBUG"], "true");
    }

    #[test]
    fn quoted_values_keep_hash_inside_quotes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "APP__NAME=\"demo # not a comment\"\n").unwrap();
        let (value, _) = load_dotenv_raw(dir.path()).unwrap();
        assert_eq!(value["APP__NAME"], "demo # not a comment");
    }

    #[test]
    fn invalid_dotenv_line_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "NOT_A_VALID_LINE\n").unwrap();
        let err = load_dotenv_raw(dir.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Configuration { .. }));
    }
}
