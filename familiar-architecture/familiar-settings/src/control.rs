//! The `ControlModel`: runtime controls carried under the reserved control
//! root (`fastapiex.settings.*`, `fastapiex.base_dir`).
//!
//! Grounded on `original_source/.../control_model.py`, `runtime_options.py`,
//! `controls.py`.

use serde_json::Value;
use tracing::warn;

use crate::path::CONTROL_ROOT;

pub const DEFAULT_ENV_PREFIX: &str = "";
pub const DEFAULT_CASE_SENSITIVE: bool = false;

/// Reload policy for the auto-refresh source-sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadMode {
    Off,
    OnChange,
    Always,
}

impl Default for ReloadMode {
    fn default() -> Self {
        ReloadMode::Off
    }
}

/// The control values read from the reserved `fastapiex` root, before being
/// folded into a resolved `SettingsSource`.
#[derive(Debug, Clone, Default)]
pub struct ControlModel {
    pub settings_path: Option<String>,
    pub base_dir: Option<String>,
    pub env_prefix: String,
    pub case_sensitive: bool,
    pub reload_mode: ReloadMode,
}

fn normalize_optional_str(value: Option<&Value>) -> Option<String> {
    let text = value_as_display_string(value?)?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn value_as_display_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_bool(value: Option<&Value>, default: bool) -> bool {
    match value {
        None => default,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(default),
        Some(Value::String(s)) => {
            let lowered = s.trim().to_lowercase();
            if ["1", "true", "yes", "on"].contains(&lowered.as_str()) {
                true
            } else if ["0", "false", "no", "off"].contains(&lowered.as_str()) {
                false
            } else {
                default
            }
        }
        _ => default,
    }
}

/// Parse the `case_sensitive` control, applying the Windows override: a
/// case-sensitive request is downgraded with a warning on Windows, since
/// Windows filesystem semantics make case-sensitive settings access
/// surprising.
pub fn parse_case_sensitive_mode(value: Option<&Value>, default: bool) -> bool {
    let requested = parse_bool(value, default);
    if cfg!(windows) && requested {
        warn!("case_sensitive=true is ignored on Windows; falling back to case-insensitive mode");
        return false;
    }
    requested
}

/// Parse the `reload` control token, warning and falling back to `default`
/// on an unrecognized token.
pub fn parse_reload_mode(value: Option<&Value>, default: ReloadMode) -> ReloadMode {
    let raw_mode: Option<String> = match value {
        None => None,
        Some(Value::Bool(b)) => Some(if *b { "on_change".to_string() } else { "off".to_string() }),
        Some(Value::Number(n)) => {
            let truthy = n.as_f64().map(|f| f != 0.0).unwrap_or(false);
            Some(if truthy { "on_change".to_string() } else { "off".to_string() })
        }
        Some(Value::String(s)) => Some(s.trim().to_lowercase()),
        Some(other) => Some(other.to_string()),
    };

    let Some(raw_mode) = raw_mode else {
        return default;
    };

    match raw_mode.as_str() {
        "always" => ReloadMode::Always,
        "on_change" | "on-change" | "onchange" | "true" | "1" | "yes" => ReloadMode::OnChange,
        "off" | "false" | "0" | "no" => ReloadMode::Off,
        other => {
            warn!(token = other, "invalid settings reload mode; falling back to default");
            default
        }
    }
}

fn find_case_insensitive<'a>(map: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a Value> {
    let lowered = key.to_lowercase();
    map.iter().find(|(k, _)| k.to_lowercase() == lowered).map(|(_, v)| v)
}

fn read_nested<'a>(snapshot: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let mut current = snapshot;
    for key in keys {
        let map = current.as_object()?;
        current = find_case_insensitive(map, key)?;
    }
    Some(current)
}

/// Read a `ControlModel` from a control-projection snapshot (a `dict`-shaped
/// value rooted at the control key, as produced by
/// `projection::materialize_control_snapshot`).
pub fn read_control_model(snapshot: &Value) -> ControlModel {
    let settings_path = read_nested(snapshot, &[CONTROL_ROOT, "settings", "path"]).and_then(|v| normalize_optional_str(Some(v)));
    let base_dir = read_nested(snapshot, &[CONTROL_ROOT, "base_dir"]).and_then(|v| normalize_optional_str(Some(v)));

    let env_prefix_raw = read_nested(snapshot, &[CONTROL_ROOT, "settings", "env_prefix"]);
    let env_prefix = match env_prefix_raw.and_then(value_as_display_string) {
        Some(text) if !text.trim().is_empty() => text.trim().to_string(),
        _ => DEFAULT_ENV_PREFIX.to_string(),
    };

    let case_sensitive_raw = read_nested(snapshot, &[CONTROL_ROOT, "settings", "case_sensitive"]);
    let reload_raw = read_nested(snapshot, &[CONTROL_ROOT, "settings", "reload"]);

    ControlModel {
        settings_path,
        base_dir,
        env_prefix,
        case_sensitive: parse_case_sensitive_mode(case_sensitive_raw, DEFAULT_CASE_SENSITIVE),
        reload_mode: parse_reload_mode(reload_raw, ReloadMode::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_full_control_model() {
        let snapshot = json!({
            "fastapiex": {
                "settings": {
                    "path": " /etc/app/settings.yaml ",
                    "env_prefix": "APP__",
                    "case_sensitive": "true",
                    "reload": "always",
                },
                "base_dir": "/etc/app",
            }
        });
        let control = read_control_model(&snapshot);
        assert_eq!(control.settings_path.as_deref(), Some("/etc/app/settings.yaml"));
        assert_eq!(control.base_dir.as_deref(), Some("/etc/app"));
        assert_eq!(control.env_prefix, "APP__");
        assert_eq!(control.reload_mode, ReloadMode::Always);
    }

    #[test]
    fn missing_controls_fall_back_to_defaults() {
        let control = read_control_model(&json!({}));
        assert_eq!(control.settings_path, None);
        assert_eq!(control.env_prefix, DEFAULT_ENV_PREFIX);
        assert_eq!(control.reload_mode, ReloadMode::Off);
    }

    #[test]
    fn invalid_reload_token_warns_and_falls_back() {
        let snapshot = json!({"fastapiex": {"settings": {"reload": "nonsense"}}});
        let control = read_control_model(&snapshot);
        assert_eq!(control.reload_mode, ReloadMode::Off);
    }
}
