//! The query engine: resolves a target (string path or type) and an
//! optional field against the validated typed root.
//!
//! Grounded on `original_source/.../query_engine.py` + `path_lookup.py`.
//! `MISS` is represented here by `crate::error::Miss`, never surfaced to a
//! public caller unconverted (see `manager.rs`).

use std::any::TypeId;

use serde_json::Value;

use crate::error::{Miss, MissResult};
use crate::path::{is_control_root, CONTROL_ROOT};
use crate::registry::{RegisteredSection, SectionKind};

/// What API shape a resolve request expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveApi {
    /// A single value of any shape.
    Value,
    /// A mapping; the resolved value must be a JSON object.
    Map,
}

/// A resolve target: a dotted string path, a declared section's type, or
/// nothing (an immediate miss).
pub enum ResolveTarget {
    Path(String),
    Type(TypeId, &'static str),
    None,
}

/// One resolve request, as captured by `SettingsRef` or a direct call to
/// `SettingsManager::resolve`.
pub struct ResolveRequest {
    pub api: ResolveApi,
    pub target: ResolveTarget,
    pub field: Option<String>,
}

impl ResolveRequest {
    /// A stable key for the manager's miss cache.
    pub fn cache_key(&self) -> String {
        let target_repr = match &self.target {
            ResolveTarget::Path(path) => format!("str:{path}"),
            ResolveTarget::Type(_, name) => format!("type:{name}"),
            ResolveTarget::None => "none".to_string(),
        };
        let api = match self.api {
            ResolveApi::Value => "value",
            ResolveApi::Map => "map",
        };
        format!("{api}|{target_repr}|field={:?}", self.field)
    }
}

/// Split a dotted string into segments, rejecting empty ones.
fn split_lookup_path(path: &str) -> MissResult<Vec<String>> {
    let parts: Vec<String> = path.split('.').map(|p| p.trim().to_string()).collect();
    if parts.is_empty() || parts.iter().any(|p| p.is_empty()) {
        return Err(Miss::new(format!("invalid lookup path '{path}'")));
    }
    Ok(parts)
}

fn find_case_insensitive_key<'a>(map: &'a serde_json::Map<String, Value>, segment: &str) -> MissResult<&'a str> {
    let folded = segment.to_lowercase();
    let matches: Vec<&str> = map.keys().filter(|k| k.to_lowercase() == folded).map(String::as_str).collect();
    match matches.as_slice() {
        [single] => Ok(single),
        _ => Err(Miss::new(format!("key '{segment}' not found or ambiguous"))),
    }
}

/// Walk `path` (a dotted string) from `root`. A step is case-folded unless
/// `case_sensitive` is true *and* the path is not inside the control
/// namespace (the control namespace is always folded).
pub fn resolve_lookup_path(root: &Value, path: &str, case_sensitive: bool) -> MissResult<Value> {
    let segments = split_lookup_path(path)?;
    let reserved_namespace = segments.first().map(|s| is_control_root(s)).unwrap_or(false);

    let mut current = root.clone();
    for segment in &segments {
        let effective_case_sensitive = case_sensitive && !reserved_namespace;
        let map = current
            .as_object()
            .ok_or_else(|| Miss::new(format!("'{segment}' is not a mapping")))?;

        current = if effective_case_sensitive {
            map.get(segment).cloned().ok_or_else(|| Miss::new(format!("key '{segment}' not found")))?
        } else {
            let key = find_case_insensitive_key(map, segment)?;
            map.get(key).cloned().expect("key was just located")
        };
    }

    Ok(current)
}

/// Does `section` stand for `target_type`? Map sections additionally match
/// the closed container concept `mapping` (represented here as a sentinel
/// `TypeId`, see `manager.rs::MAPPING_TYPE_MARKER`).
fn section_matches_target_type(section: &RegisteredSection, target_type: TypeId, mapping_marker: TypeId) -> bool {
    if section.model_id == target_type {
        return true;
    }
    section.kind == SectionKind::Map && target_type == mapping_marker
}

fn resolve_type_target(
    target_type: TypeId,
    target_name: &str,
    sections: &[RegisteredSection],
    mapping_marker: TypeId,
) -> MissResult<RegisteredSection> {
    let candidates: Vec<&RegisteredSection> = sections
        .iter()
        .filter(|section| section_matches_target_type(section, target_type, mapping_marker))
        .collect();

    match candidates.as_slice() {
        [] => Err(Miss::new(format!("target type '{target_name}' did not match any declared section"))),
        [single] => Ok((*single).clone()),
        many => {
            let mut paths: Vec<String> = many.iter().map(|s| s.path_text()).collect();
            paths.sort();
            Err(Miss::new(format!("target type '{target_name}' matched multiple sections: {}", paths.join(", "))))
        }
    }
}

fn resolve_target_value(
    target: &ResolveTarget,
    settings: &Value,
    sections: &[RegisteredSection],
    case_sensitive: bool,
    mapping_marker: TypeId,
) -> MissResult<Value> {
    match target {
        ResolveTarget::None => Err(Miss::new("target is not provided")),
        ResolveTarget::Path(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(Miss::new("target is empty"));
            }
            resolve_lookup_path(settings, trimmed, case_sensitive)
        }
        ResolveTarget::Type(type_id, name) => {
            let section = resolve_type_target(*type_id, name, sections, mapping_marker)?;
            // Type-target injection resolves declared sections exactly.
            resolve_lookup_path(settings, &section.path_text(), true)
        }
    }
}

/// Evaluate a full resolve request against the validated settings root.
pub fn evaluate_request(
    request: &ResolveRequest,
    settings: &Value,
    sections: &[RegisteredSection],
    case_sensitive: bool,
    mapping_marker: TypeId,
) -> MissResult<Value> {
    let mut value = resolve_target_value(&request.target, settings, sections, case_sensitive, mapping_marker)?;

    if let Some(field) = &request.field {
        let trimmed = field.trim();
        if trimmed.is_empty() {
            return Err(Miss::new("field is empty"));
        }
        value = resolve_lookup_path(&value, trimmed, case_sensitive)?;
    }

    if request.api == ResolveApi::Map && !value.is_object() {
        return Err(Miss::new("resolved value is not a mapping"));
    }

    Ok(value)
}

pub const fn control_root_name() -> &'static str {
    CONTROL_ROOT
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn folded_lookup_matches_any_case() {
        let root = json!({"App": {"Name": "demo"}});
        let value = resolve_lookup_path(&root, "app.name", false).unwrap();
        assert_eq!(value, "demo");
    }

    #[test]
    fn exact_lookup_requires_exact_case() {
        let root = json!({"app": {"name": "demo"}});
        assert!(resolve_lookup_path(&root, "App.Name", true).is_err());
        assert_eq!(resolve_lookup_path(&root, "app.name", true).unwrap(), "demo");
    }

    #[test]
    fn control_namespace_is_always_folded_even_under_exact_policy() {
        let root = json!({"fastapiex": {"settings": {"reload": "always"}}});
        let folded = resolve_lookup_path(&root, "FastAPIEx.Settings.Reload", true).unwrap();
        let exact = resolve_lookup_path(&root, "fastapiex.settings.reload", true).unwrap();
        assert_eq!(folded, exact);
        assert_eq!(folded, "always");
    }

    #[test]
    fn map_api_rejects_non_mapping_result() {
        let root = json!({"app": {"name": "demo"}});
        let request = ResolveRequest { api: ResolveApi::Map, target: ResolveTarget::Path("app.name".into()), field: None };
        let sections: Vec<RegisteredSection> = Vec::new();
        let err = evaluate_request(&request, &root, &sections, false, TypeId::of::<()>()).unwrap_err();
        assert!(err.0.contains("not a mapping"));
    }
}
