//! The control-plane convergence loop.
//!
//! Grounded on `original_source/.../control_convergence.py`. A
//! `SettingsSource` is a resolved, structurally-equal record (see
//! `manager::SettingsSource`); the loop repeatedly rebuilds one from the
//! control projection until the settings_path stabilises or a cycle is
//! detected.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::warn;

/// Anything the convergence loop needs to read and rebuild from a resolved
/// source. Kept generic over `manager::SettingsSource` so this module has no
/// dependency on the manager's internals.
pub trait ConvergingSource: Clone + PartialEq {
    fn settings_path(&self) -> &PathBuf;
    fn with_settings_path(&self, path: PathBuf) -> Self;
}

/// Repeat up to a fixed point: materialise the control view, build a new
/// source from it, and either switch path (looping) or accept a non-path
/// change and stop. Returns the converged source and whether anything
/// changed from `initial_source`.
pub fn converge<S: ConvergingSource>(
    initial_source: S,
    mut materialize_control_snapshot: impl FnMut() -> serde_json::Value,
    mut build_source_from_controls: impl FnMut(&serde_json::Value, &S) -> S,
    mut on_path_switch: impl FnMut(&S),
) -> (S, bool) {
    let mut source = initial_source;
    let mut changed = false;
    let mut visited: HashSet<PathBuf> = HashSet::new();
    visited.insert(source.settings_path().clone());

    loop {
        let control_snapshot = materialize_control_snapshot();
        let next_source = build_source_from_controls(&control_snapshot, &source);

        if next_source.settings_path() != source.settings_path() {
            if visited.contains(next_source.settings_path()) {
                warn!(
                    path = %source.settings_path().display(),
                    "settings path control cycle detected; keeping current path"
                );
                let stabilized = next_source.with_settings_path(source.settings_path().clone());
                changed = changed || stabilized != source;
                return (stabilized, changed);
            }

            visited.insert(next_source.settings_path().clone());
            source = next_source;
            on_path_switch(&source);
            changed = true;
            continue;
        }

        if next_source != source {
            source = next_source;
            changed = true;
        }

        return (source, changed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct FakeSource {
        path: PathBuf,
        tag: String,
    }

    impl ConvergingSource for FakeSource {
        fn settings_path(&self) -> &PathBuf {
            &self.path
        }
        fn with_settings_path(&self, path: PathBuf) -> Self {
            FakeSource { path, tag: self.tag.clone() }
        }
    }

    #[test]
    fn converges_immediately_when_control_view_is_empty() {
        let initial = FakeSource { path: PathBuf::from("/a.yaml"), tag: "a".into() };
        let (source, changed) = converge(
            initial.clone(),
            || json!({}),
            |_snapshot: &Value, current: &FakeSource| current.clone(),
            |_| {},
        );
        assert_eq!(source, initial);
        assert!(!changed);
    }

    #[test]
    fn follows_a_single_redirect_then_stops() {
        let initial = FakeSource { path: PathBuf::from("/a.yaml"), tag: "a".into() };
        let (source, changed) = converge(
            initial,
            || json!({"fastapiex": {"settings": {"path": "/b.yaml"}}}),
            |snapshot: &Value, current: &FakeSource| {
                let path = snapshot["fastapiex"]["settings"]["path"].as_str().unwrap_or("");
                if path.is_empty() {
                    current.clone()
                } else {
                    FakeSource { path: PathBuf::from(path), tag: current.tag.clone() }
                }
            },
            |_| {},
        );
        assert_eq!(source.path, PathBuf::from("/b.yaml"));
        assert!(changed);
    }

    #[test]
    fn freezes_on_a_two_cycle() {
        let initial = FakeSource { path: PathBuf::from("/x.yaml"), tag: "x".into() };
        let (source, changed) = converge(
            initial,
            || json!({}),
            |_snapshot: &Value, current: &FakeSource| {
                let next_path = if current.path == PathBuf::from("/x.yaml") { "/y.yaml" } else { "/x.yaml" };
                FakeSource { path: PathBuf::from(next_path), tag: current.tag.clone() }
            },
            |_| {},
        );
        assert!(source.path == PathBuf::from("/x.yaml") || source.path == PathBuf::from("/y.yaml"));
        assert!(changed);
    }
}
