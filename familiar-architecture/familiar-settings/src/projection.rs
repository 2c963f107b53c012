//! Reprojection of stored entries into the control view and the effective
//! (business) view.
//!
//! Grounded on `original_source/.../raw_projection.py`
//! (+ `tests/test_query_engine.py`, which exercises both views end to end).
//! File entries are stored already-nested (see `store::flatten_mapping`);
//! env/dotenv entries are stored flat, keyed by the untouched raw env key
//! (see `source::env`, `source::dotenv`) — both projections re-derive a
//! nested path from that raw key, under different rules.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::env_key::key_to_parts;
use crate::path::{fold, Path, CONTROL_ROOT};
use crate::scalar::parse_env_value;
use crate::store::{nest_winners, SourceEntry, SourceName};

fn control_key_prefix() -> String {
    format!("{}__", CONTROL_ROOT.to_uppercase())
}

fn is_reserved_env_key(raw_key: &str) -> bool {
    raw_key.to_uppercase().starts_with(&control_key_prefix())
}

/// Split a raw env/dotenv key into folded control path segments, or `None`
/// when it does not belong to the reserved namespace.
fn control_parts(raw_key: &str) -> Option<Vec<String>> {
    if !is_reserved_env_key(raw_key) {
        return None;
    }
    let parts: Vec<&str> = raw_key.split("__").collect();
    if parts.iter().any(|part| part.is_empty()) {
        return None;
    }
    Some(parts.into_iter().map(fold).collect())
}

fn pick_winners(candidates: Vec<(Path, u64, u8, Value)>) -> BTreeMap<Path, Value> {
    let mut winners: BTreeMap<Path, (u64, u8, Value)> = BTreeMap::new();
    for (path, rev, priority, value) in candidates {
        match winners.get(&path) {
            Some((existing_rev, existing_priority, _)) if (*existing_rev, *existing_priority) >= (rev, priority) => {}
            _ => {
                winners.insert(path, (rev, priority, value));
            }
        }
    }
    winners.into_iter().map(|(path, (_, _, value))| (path, value)).collect()
}

/// Reproject stored entries into the control view: a `dict`-shaped mapping
/// rooted at the control key, always folded, independent of the active
/// env_prefix or case policy (the control plane must be readable before
/// either is known).
pub fn materialize_control_snapshot(entries: &[SourceEntry]) -> Value {
    let mut candidates = Vec::new();

    for entry in entries {
        match entry.source {
            SourceName::File => {
                if entry.path.is_control_root() {
                    candidates.push((entry.path.folded(), entry.rev, entry.source.priority(), entry.value.clone()));
                }
            }
            SourceName::Dotenv | SourceName::Env => {
                let Some(raw_key) = entry.path.segments().first() else {
                    continue;
                };
                if let Some(parts) = control_parts(raw_key) {
                    let value = match &entry.value {
                        Value::String(s) => parse_env_value(s),
                        other => other.clone(),
                    };
                    candidates.push((Path::new(parts), entry.rev, entry.source.priority(), value));
                }
            }
        }
    }

    nest_winners(&pick_winners(candidates))
}

/// Reproject stored entries into the effective view: file entries pass
/// through under their stored path; env/dotenv entries are re-split under
/// the *current* env_prefix + case policy and their string values re-run
/// through the scalar parser.
pub fn materialize_effective_snapshot(entries: &[SourceEntry], env_prefix: &str, case_sensitive: bool) -> Value {
    let mut candidates = Vec::new();

    for entry in entries {
        match entry.source {
            SourceName::File => {
                candidates.push((entry.path.clone(), entry.rev, entry.source.priority(), entry.value.clone()));
            }
            SourceName::Dotenv | SourceName::Env => {
                let Some(raw_key) = entry.path.segments().first() else {
                    continue;
                };
                let Some(parts) = key_to_parts(raw_key, env_prefix, case_sensitive) else {
                    continue;
                };
                let value = match &entry.value {
                    Value::String(s) => parse_env_value(s),
                    other => other.clone(),
                };
                candidates.push((Path::new(parts), entry.rev, entry.source.priority(), value));
            }
        }
    }

    nest_winners(&pick_winners(candidates))
}
