//! Scalar value parsing for env/dotenv string values.
//!
//! Grounded on `original_source/.../env_value_parser.py`
//! (+ `test_env_value_parser.py`).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

const TRUE_TEXT_VALUES: &[&str] = &["1", "true", "yes", "on"];
const FALSE_TEXT_VALUES: &[&str] = &["0", "false", "no", "off"];
const NULL_TEXT_VALUES: &[&str] = &["null", "none"];

static INT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?\d(?:_?\d)*$").unwrap());
static FLOAT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[+-]?(?:\d(?:_?\d)*)[eE][+-]?\d+$|^[+-]?(?:(?:\d(?:_?\d)*)?\.\d(?:_?\d)*|\d(?:_?\d)*\.)(?:[eE][+-]?\d+)?$",
    )
    .unwrap()
});

/// Strip one pair of matching surrounding quotes (single or double).
pub fn strip_matching_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if first == last && (first == b'\'' || first == b'"') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Strip an unquoted, unescaped `#` comment from a dotenv line value.
pub fn strip_inline_comment(raw: &str) -> String {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (idx, ch) in raw.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        if ch == '\'' || ch == '"' {
            match quote {
                None => quote = Some(ch),
                Some(q) if q == ch => quote = None,
                _ => {}
            }
            continue;
        }
        if ch == '#' && quote.is_none() {
            return raw[..idx].trim_end().to_string();
        }
    }
    raw.trim_end().to_string()
}

/// Dotenv-specific value cleanup: comment stripping then quote stripping.
/// Produces a raw string; scalar typing happens later via `parse_env_value`.
pub fn parse_dotenv_value(raw: &str) -> String {
    let value = strip_inline_comment(raw.trim());
    strip_matching_quotes(&value).to_string()
}

/// Parse a raw env-style string into a typed JSON value: quote stripping,
/// bool/null tokens, int/float literals (with `_` separators), JSON
/// literals when the value looks like an object/array, falling back to the
/// raw string.
pub fn parse_env_value(raw: &str) -> Value {
    let stripped = raw.trim();
    if stripped.is_empty() {
        return Value::String(String::new());
    }

    let value = strip_matching_quotes(stripped);
    let lowered = value.to_lowercase();
    if TRUE_TEXT_VALUES.contains(&lowered.as_str()) {
        return Value::Bool(true);
    }
    if FALSE_TEXT_VALUES.contains(&lowered.as_str()) {
        return Value::Bool(false);
    }
    if NULL_TEXT_VALUES.contains(&lowered.as_str()) {
        return Value::Null;
    }

    let looks_like_object = value.starts_with('{') && value.ends_with('}');
    let looks_like_array = value.starts_with('[') && value.ends_with(']');
    if looks_like_object || looks_like_array {
        if let Ok(parsed) = serde_json::from_str::<Value>(value) {
            return parsed;
        }
        return Value::String(value.to_string());
    }

    let normalized = value.replace('_', "");
    if INT_RE.is_match(value) {
        if let Ok(i) = normalized.parse::<i64>() {
            return Value::Number(i.into());
        }
    }
    if FLOAT_RE.is_match(value) {
        if let Ok(f) = normalized.parse::<f64>() {
            if let Some(num) = serde_json::Number::from_f64(f) {
                return Value::Number(num);
            }
        }
    }

    Value::String(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_booleans() {
        assert_eq!(parse_env_value("true"), Value::Bool(true));
        assert_eq!(parse_env_value("Yes"), Value::Bool(true));
        assert_eq!(parse_env_value("off"), Value::Bool(false));
    }

    #[test]
    fn parses_null_tokens() {
        assert_eq!(parse_env_value("null"), Value::Null);
        assert_eq!(parse_env_value("None"), Value::Null);
    }

    #[test]
    fn parses_integers_with_separators() {
        assert_eq!(parse_env_value("1_000"), Value::Number(1000.into()));
        assert_eq!(parse_env_value("-42"), Value::Number((-42).into()));
    }

    #[test]
    fn parses_floats() {
        assert_eq!(parse_env_value("3.14"), serde_json::json!(3.14));
        assert_eq!(parse_env_value("1e3"), serde_json::json!(1000.0));
    }

    #[test]
    fn parses_json_literals() {
        assert_eq!(parse_env_value(r#"{"a": 1}"#), serde_json::json!({"a": 1}));
        assert_eq!(parse_env_value("[1, 2]"), serde_json::json!([1, 2]));
    }

    #[test]
    fn falls_back_to_raw_string() {
        assert_eq!(parse_env_value("hello world"), Value::String("hello world".to_string()));
    }

    #[test]
    fn strips_quotes() {
        assert_eq!(parse_env_value("\"hello\""), Value::String("hello".to_string()));
    }

    #[test]
    fn dotenv_strips_comments_respecting_quotes() {
        assert_eq!(parse_dotenv_value("value # a comment"), "value");
        assert_eq!(parse_dotenv_value("\"value # not a comment\""), "value # not a comment");
    }
}
