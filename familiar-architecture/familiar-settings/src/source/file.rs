//! The structured settings file loader.
//!
//! Grounded on `original_source/.../loader.py::load_yaml_settings`. The
//! teacher's `config::File` layering is replaced here with a direct
//! `serde_yaml` parse into `serde_json::Value`, since this runtime owns its
//! own layering semantics rather than deferring to the `config` crate's
//! builder.

use std::path::Path;

use serde_json::Value;

use crate::error::SettingsError;

use super::{file_state, FreshnessToken};

/// Read the structured settings file at `path`. An absent file yields an
/// empty mapping (not an error) so a fresh deployment can boot before the
/// file exists. A non-empty, non-mapping top level is a hard configuration
/// error.
pub fn load_structured_file(path: &Path) -> Result<(Value, FreshnessToken), SettingsError> {
    let token = file_state(path);

    if !path.exists() {
        return Ok((Value::Object(serde_json::Map::new()), token));
    }

    let text = std::fs::read_to_string(path)
        .map_err(|err| SettingsError::configuration(format!("failed to read settings file {}: {err}", path.display())))?;

    if text.trim().is_empty() {
        return Ok((Value::Object(serde_json::Map::new()), token));
    }

    let raw: Value = serde_yaml::from_str(&text)
        .map_err(|err| SettingsError::configuration(format!("failed to parse settings file {}: {err}", path.display())))?;

    match raw {
        Value::Null => Ok((Value::Object(serde_json::Map::new()), token)),
        Value::Object(_) => Ok((raw, token)),
        _ => Err(SettingsError::configuration(format!(
            "settings file must contain a mapping at top-level: {}",
            path.display()
        ))),
    }
}
