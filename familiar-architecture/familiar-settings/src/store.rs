//! The layered last-writer-wins store.
//!
//! Grounded on `original_source/.../live_config.py`
//! (+ `tests/test_live_config_store.py`, which resolves the Open Question:
//! a later single-source write dominates an earlier higher-priority seed —
//! the `(rev, priority)` winner rule, not `(priority, rev)`).

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::path::Path;

/// The closed set of sources this runtime merges, in ascending priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceName {
    File = 1,
    Dotenv = 2,
    Env = 3,
}

impl SourceName {
    pub fn priority(&self) -> u8 {
        *self as u8
    }

    /// Sources in ascending priority order: file, dotenv, env.
    pub fn order() -> [SourceName; 3] {
        [SourceName::File, SourceName::Dotenv, SourceName::Env]
    }
}

impl std::fmt::Display for SourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SourceName::File => "file",
            SourceName::Dotenv => "dotenv",
            SourceName::Env => "env",
        };
        write!(f, "{text}")
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SourceValue {
    rev: u64,
    value: Value,
}

type Slot = BTreeMap<SourceName, SourceValue>;

/// One `(source, rev, path, value)` tuple, enumerated from the store for
/// projection.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub source: SourceName,
    pub rev: u64,
    pub path: Path,
    pub value: Value,
}

/// Per-leaf slots merged by last-writer-wins with source-priority tie-break.
#[derive(Debug, Default)]
pub struct LwwStore {
    slots: BTreeMap<Path, Slot>,
    rev_counter: u64,
    version: u64,
    cache: std::cell::RefCell<Option<Value>>,
}

impl LwwStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Seed every slot from all three sources. Seeded revisions equal source
    /// priority, so at startup env seeds dominate dotenv seeds dominate file
    /// seeds purely on the priority tie-break.
    pub fn reset(&mut self, sources: BTreeMap<SourceName, Value>) -> bool {
        let mut new_slots: BTreeMap<Path, Slot> = BTreeMap::new();
        for source in SourceName::order() {
            let mapping = sources.get(&source).cloned().unwrap_or(Value::Object(Map::new()));
            let flat = flatten_mapping(&mapping);
            let rev = source.priority() as u64;
            for (path, value) in flat {
                new_slots.entry(path).or_default().insert(source, SourceValue { rev, value });
            }
        }

        if new_slots == self.slots {
            return false;
        }

        let max_rev = new_slots
            .values()
            .flat_map(|slot| slot.values())
            .map(|sv| sv.rev)
            .max()
            .unwrap_or(0);

        self.slots = new_slots;
        self.rev_counter = max_rev;
        self.version += 1;
        *self.cache.borrow_mut() = None;
        true
    }

    /// Replace a single source's contents.
    pub fn replace_source(&mut self, source: SourceName, mapping: Value) -> bool {
        let mut updates = BTreeMap::new();
        updates.insert(source, mapping);
        self.replace_sources(updates)
    }

    /// Atomically replace the contents of one or more sources. Sources
    /// inside one call are assigned revisions in ascending priority order,
    /// so within the call env still wins on a tie.
    pub fn replace_sources(&mut self, updates: BTreeMap<SourceName, Value>) -> bool {
        let mut touched: Vec<SourceName> = Vec::new();
        let mut removed_by_source: BTreeMap<SourceName, Vec<Path>> = BTreeMap::new();
        let mut updated_by_source: BTreeMap<SourceName, BTreeMap<Path, Value>> = BTreeMap::new();

        for (source, mapping) in &updates {
            let next_flat = flatten_mapping(mapping);
            let current = self.current_source_values(*source);

            let removed: Vec<Path> = current.keys().filter(|p| !next_flat.contains_key(*p)).cloned().collect();
            let mut changed: BTreeMap<Path, Value> = BTreeMap::new();
            for (path, value) in &next_flat {
                let is_changed = match current.get(path) {
                    Some(existing) => existing.value != *value,
                    None => true,
                };
                if is_changed {
                    changed.insert(path.clone(), value.clone());
                }
            }

            if removed.is_empty() && changed.is_empty() {
                continue;
            }
            touched.push(*source);
            removed_by_source.insert(*source, removed);
            updated_by_source.insert(*source, changed);
        }

        if touched.is_empty() {
            return false;
        }

        let ordered: Vec<SourceName> = SourceName::order().into_iter().filter(|s| touched.contains(s)).collect();
        let base = self.rev_counter;
        let mut rev_by_source: BTreeMap<SourceName, u64> = BTreeMap::new();
        for (offset, source) in ordered.iter().enumerate() {
            rev_by_source.insert(*source, base + (offset as u64) + 1);
        }
        self.rev_counter = base + ordered.len() as u64;

        for source in &ordered {
            for path in removed_by_source.get(source).into_iter().flatten() {
                if let Some(slot) = self.slots.get_mut(path) {
                    slot.remove(source);
                    if slot.is_empty() {
                        self.slots.remove(path);
                    }
                }
            }
            let rev = rev_by_source[source];
            if let Some(changed) = updated_by_source.get(source) {
                for (path, value) in changed {
                    self.slots
                        .entry(path.clone())
                        .or_default()
                        .insert(*source, SourceValue { rev, value: value.clone() });
                }
            }
        }

        self.version += 1;
        *self.cache.borrow_mut() = None;
        true
    }

    /// Return a deep-copied nested mapping of the per-path winner, cached
    /// until the next write.
    pub fn materialize(&self) -> Value {
        if let Some(cached) = self.cache.borrow().as_ref() {
            return cached.clone();
        }

        let winners = self.compute_winners();
        let built = build_materialized_snapshot(&winners);
        *self.cache.borrow_mut() = Some(built.clone());
        built
    }

    /// Enumerate every slot entry as a flat list for projection.
    pub fn entries(&self) -> Vec<SourceEntry> {
        let mut out = Vec::new();
        for (path, slot) in &self.slots {
            for (source, sv) in slot {
                out.push(SourceEntry {
                    source: *source,
                    rev: sv.rev,
                    path: path.clone(),
                    value: sv.value.clone(),
                });
            }
        }
        out
    }

    fn current_source_values(&self, source: SourceName) -> BTreeMap<Path, SourceValue> {
        let mut result = BTreeMap::new();
        for (path, slot) in &self.slots {
            if let Some(sv) = slot.get(&source) {
                result.insert(path.clone(), sv.clone());
            }
        }
        result
    }

    fn compute_winners(&self) -> BTreeMap<Path, (u64, u8, Value)> {
        let mut winners = BTreeMap::new();
        for (path, slot) in &self.slots {
            let (source, sv) = pick_winner(slot);
            winners.insert(path.clone(), (sv.rev, source.priority(), sv.value.clone()));
        }
        winners
    }
}

fn pick_winner(slot: &Slot) -> (SourceName, &SourceValue) {
    slot.iter()
        .max_by_key(|(source, sv)| (sv.rev, source.priority()))
        .map(|(s, v)| (*s, v))
        .expect("slot must be non-empty")
}

/// Flatten a nested JSON object into `Path -> leaf value` pairs. An empty
/// nested object is itself a leaf value (there is nothing to recurse into).
fn flatten_mapping(value: &Value) -> BTreeMap<Path, Value> {
    let mut flat = BTreeMap::new();
    flatten_into(value, Vec::new(), &mut flat);
    flat
}

fn flatten_into(value: &Value, prefix: Vec<String>, out: &mut BTreeMap<Path, Value>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let mut next_prefix = prefix.clone();
                next_prefix.push(key.clone());
                flatten_into(child, next_prefix, out);
            }
        }
        other => {
            if !prefix.is_empty() {
                out.insert(Path::new(prefix), other.clone());
            }
        }
    }
}

fn build_materialized_snapshot(winners: &BTreeMap<Path, (u64, u8, Value)>) -> Value {
    let mut ordered: Vec<(Path, u64, u8, Value)> = winners
        .iter()
        .map(|(path, (rev, priority, value))| (path.clone(), *rev, *priority, value.clone()))
        .collect();
    ordered.sort_by(|a, b| {
        (a.1, a.3 as u64, a.0.len(), a.0.clone()).cmp(&(b.1, b.3 as u64, b.0.len(), b.0.clone()))
    });

    let mut merged = Map::new();
    for (path, _, _, value) in ordered {
        set_nested_force(&mut merged, path.segments(), value);
    }
    Value::Object(merged)
}

/// Build a nested mapping from an already-resolved `Path -> Value` winner
/// set. Shared with `projection.rs`, which computes its own winners over
/// re-derived paths rather than the store's raw slots.
pub(crate) fn nest_winners(winners: &BTreeMap<Path, Value>) -> Value {
    let mut merged = Map::new();
    for (path, value) in winners {
        set_nested_force(&mut merged, path.segments(), value.clone());
    }
    Value::Object(merged)
}

pub(crate) fn set_nested_force(target: &mut Map<String, Value>, path: &[String], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };
    if rest.is_empty() {
        target.insert(head.clone(), value);
        return;
    }
    let entry = target.entry(head.clone()).or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    set_nested_force(entry.as_object_mut().unwrap(), rest, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sources(file: Value, dotenv: Value, env: Value) -> BTreeMap<SourceName, Value> {
        let mut map = BTreeMap::new();
        map.insert(SourceName::File, file);
        map.insert(SourceName::Dotenv, dotenv);
        map.insert(SourceName::Env, env);
        map
    }

    #[test]
    fn reset_uses_startup_precedence_env_over_dotenv_over_file() {
        let mut store = LwwStore::new();
        let changed = store.reset(sources(
            json!({"app": {"name": "file"}}),
            json!({"app": {"name": "dotenv"}}),
            json!({"app": {"name": "env"}}),
        ));
        assert!(changed);
        assert_eq!(store.materialize()["app"]["name"], "env");
    }

    #[test]
    fn single_source_update_is_lww_even_against_higher_priority_source() {
        let mut store = LwwStore::new();
        store.reset(sources(
            json!({"app": {"name": "file-v1"}}),
            json!({}),
            json!({"app": {"name": "env-v1"}}),
        ));
        assert_eq!(store.materialize()["app"]["name"], "env-v1");

        let changed = store.replace_source(SourceName::File, json!({"app": {"name": "file-v2"}}));
        assert!(changed);
        assert_eq!(store.materialize()["app"]["name"], "file-v2");
    }

    #[test]
    fn multi_source_batch_assigns_revs_by_priority_order() {
        let mut store = LwwStore::new();
        store.reset(sources(
            json!({"app": {"name": "file-v1"}}),
            json!({"app": {"name": "dotenv-v1"}}),
            json!({}),
        ));

        let mut updates = BTreeMap::new();
        updates.insert(SourceName::File, json!({"app": {"name": "file-v2"}}));
        updates.insert(SourceName::Dotenv, json!({"app": {"name": "dotenv-v2"}}));
        let changed = store.replace_sources(updates);
        assert!(changed);
        assert_eq!(store.materialize()["app"]["name"], "dotenv-v2");
    }

    #[test]
    fn no_op_write_returns_false_and_does_not_bump_version() {
        let mut store = LwwStore::new();
        store.reset(sources(json!({"app": {"name": "file-v1"}}), json!({}), json!({})));
        let version_before = store.version();
        let changed = store.replace_source(SourceName::File, json!({"app": {"name": "file-v1"}}));
        assert!(!changed);
        assert_eq!(store.version(), version_before);
    }

    #[test]
    fn removed_path_drops_source_from_slot() {
        let mut store = LwwStore::new();
        store.reset(sources(json!({"app": {"name": "file-v1"}}), json!({}), json!({"app": {"name": "env-v1"}})));
        store.replace_source(SourceName::Env, json!({}));
        assert_eq!(store.materialize()["app"]["name"], "file-v1");
    }
}
