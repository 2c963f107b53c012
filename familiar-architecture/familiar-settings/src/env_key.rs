//! `A__B__C` env/dotenv key parsing into path segments.
//!
//! Grounded on `original_source/.../env_keypath.py` (+ `test_env_keypath.py`).

use tracing::warn;

use crate::path::{fold, CONTROL_ROOT};

pub const ENV_KEY_SEPARATOR: &str = "__";

fn control_env_prefix() -> String {
    format!("{}__", CONTROL_ROOT.to_uppercase())
}

fn starts_with_prefix(value: &str, prefix: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        value.starts_with(prefix)
    } else {
        value.to_lowercase().starts_with(&prefix.to_lowercase())
    }
}

/// Split a raw env/dotenv key into path segments under the active prefix and
/// case policy. Returns `None` when the key does not belong to this runtime's
/// namespace (wrong prefix, empty segment, reserved-root tunnelling).
///
/// A key inside the reserved control namespace is always accepted and always
/// folded, regardless of `case_sensitive`.
pub fn key_to_parts(env_key: &str, prefix: &str, case_sensitive: bool) -> Option<Vec<String>> {
    let reserved = env_key.to_uppercase().starts_with(&control_env_prefix());

    let key_path: String = if reserved {
        env_key.to_string()
    } else if !prefix.is_empty() {
        if !starts_with_prefix(env_key, prefix, case_sensitive) {
            return None;
        }
        let stripped = &env_key[prefix.len()..];
        if stripped.to_uppercase().starts_with(&control_env_prefix()) {
            warn!(
                env_key,
                prefix,
                stripped,
                "ignoring env key: control keys must not carry the business prefix"
            );
            return None;
        }
        stripped.to_string()
    } else {
        env_key.to_string()
    };

    if key_path.is_empty() {
        return None;
    }

    let raw_parts: Vec<&str> = key_path.split(ENV_KEY_SEPARATOR).collect();
    if raw_parts.iter().any(|part| part.is_empty()) {
        return None;
    }

    if reserved {
        return Some(raw_parts.into_iter().map(fold).collect());
    }
    if case_sensitive {
        return Some(raw_parts.into_iter().map(str::to_string).collect());
    }
    Some(raw_parts.into_iter().map(fold).collect())
}
