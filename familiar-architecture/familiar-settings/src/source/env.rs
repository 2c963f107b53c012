//! The process environment loader.
//!
//! Grounded on `original_source/.../loader.py::load_env_overrides`. Unlike
//! the file and dotenv loaders, the process environment has no freshness
//! token of its own (there is no cheap way to stat it), so the source-sync
//! coordinator always re-reads it on an `auto` pass.

use serde_json::{Map, Value};

use super::FreshnessToken;

/// Snapshot `std::env::vars()` into a flat mapping of raw key -> raw string
/// value. Key-splitting (`__`) and scalar typing happen later, during
/// projection.
pub fn load_env_raw() -> (Value, FreshnessToken) {
    let mut overrides = Map::new();
    for (key, value) in std::env::vars() {
        overrides.insert(key, Value::String(value));
    }
    (Value::Object(overrides), FreshnessToken::None)
}
