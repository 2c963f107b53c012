//! The source-sync coordinator: decides which sources re-read on which
//! trigger, and tracks per-source freshness between calls.
//!
//! Grounded on `original_source/.../source_sync.py`.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::control::ReloadMode;
use crate::error::SettingsError;
use crate::source::FreshnessToken;
use crate::store::{LwwStore, SourceName};

/// When to re-read sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// No-op.
    None,
    /// Re-read whatever the active `reload_mode` control dictates.
    Auto,
    /// Re-read every `sync_on_reload`-flagged source; used by manual reload.
    Reload,
    /// Re-read every source; used at explicit init and when the store is
    /// still empty.
    Full,
}

pub type SnapshotReader = Box<dyn Fn() -> Result<(Value, FreshnessToken), SettingsError> + Send + Sync>;

pub struct SourceSyncSpec {
    pub read_snapshot: SnapshotReader,
    pub sync_on_reload: bool,
    pub sync_on_path_switch: bool,
}

/// Coordinates per-source re-reads against a shared `LwwStore`.
pub struct SourceSyncCoordinator {
    source_states: BTreeMap<SourceName, FreshnessToken>,
    specs: BTreeMap<SourceName, SourceSyncSpec>,
}

impl Default for SourceSyncCoordinator {
    fn default() -> Self {
        Self { source_states: BTreeMap::new(), specs: BTreeMap::new() }
    }
}

impl SourceSyncCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or update) the spec for a source. `sync_on_reload` /
    /// `sync_on_path_switch` default to the source's previous setting, or
    /// `false` if never registered, matching the original's "patch an
    /// existing registration" semantics.
    pub fn register(
        &mut self,
        source: SourceName,
        read_snapshot: SnapshotReader,
        sync_on_reload: Option<bool>,
        sync_on_path_switch: Option<bool>,
    ) {
        let current = self.specs.get(&source);
        let resolved_reload = sync_on_reload.unwrap_or_else(|| current.map(|s| s.sync_on_reload).unwrap_or(false));
        let resolved_path_switch =
            sync_on_path_switch.unwrap_or_else(|| current.map(|s| s.sync_on_path_switch).unwrap_or(false));

        self.specs.insert(
            source,
            SourceSyncSpec {
                read_snapshot,
                sync_on_reload: resolved_reload,
                sync_on_path_switch: resolved_path_switch,
            },
        );
    }

    /// Update the policy flags of an already-registered source without
    /// replacing its reader.
    pub fn set_policy(&mut self, source: SourceName, sync_on_reload: Option<bool>, sync_on_path_switch: Option<bool>) {
        if let Some(spec) = self.specs.get_mut(&source) {
            if let Some(reload) = sync_on_reload {
                spec.sync_on_reload = reload;
            }
            if let Some(path_switch) = sync_on_path_switch {
                spec.sync_on_path_switch = path_switch;
            }
        }
    }

    pub fn sync_for_mode(
        &mut self,
        mode: SyncMode,
        reload_mode: ReloadMode,
        store: &mut LwwStore,
        store_is_empty: bool,
    ) -> Result<bool, SettingsError> {
        match mode {
            SyncMode::None => Ok(false),
            SyncMode::Full => self.reload_all(store),
            SyncMode::Reload => self.sync_selected(store, true, |spec| spec.sync_on_reload),
            SyncMode::Auto => {
                if store_is_empty {
                    return self.reload_all(store);
                }
                match reload_mode {
                    ReloadMode::Off => Ok(false),
                    ReloadMode::Always => self.sync_selected(store, true, |spec| spec.sync_on_reload),
                    ReloadMode::OnChange => self.sync_selected(store, false, |spec| spec.sync_on_reload),
                }
            }
        }
    }

    /// Re-read every source and reset the store from scratch.
    pub fn reload_all(&mut self, store: &mut LwwStore) -> Result<bool, SettingsError> {
        let mut payloads = BTreeMap::new();
        let mut states = BTreeMap::new();
        for source in SourceName::order() {
            let (payload, state) = self.read_source_snapshot(source)?;
            payloads.insert(source, payload);
            states.insert(source, state);
        }
        let changed = store.reset(payloads);
        self.source_states = states;
        Ok(changed)
    }

    /// Re-read every source whose `sync_on_path_switch` is set, always
    /// forced (a path switch invalidates any cached freshness comparison).
    pub fn sync_path_switch(&mut self, store: &mut LwwStore) -> Result<bool, SettingsError> {
        self.sync_selected(store, true, |spec| spec.sync_on_path_switch)
    }

    fn sync_selected(
        &mut self,
        store: &mut LwwStore,
        force: bool,
        selector: impl Fn(&SourceSyncSpec) -> bool,
    ) -> Result<bool, SettingsError> {
        let mut changed = false;
        for source in SourceName::order() {
            let Some(spec) = self.specs.get(&source) else { continue };
            if !selector(spec) {
                continue;
            }
            changed = self.sync_source(store, source, force)? || changed;
        }
        Ok(changed)
    }

    fn sync_source(&mut self, store: &mut LwwStore, source: SourceName, force: bool) -> Result<bool, SettingsError> {
        let (payload, state) = self.read_source_snapshot(source)?;
        if !force {
            if let Some(previous) = self.source_states.get(&source) {
                if *previous == state {
                    return Ok(false);
                }
            }
        }
        let changed = store.replace_source(source, payload);
        self.source_states.insert(source, state);
        Ok(changed)
    }

    fn read_source_snapshot(&self, source: SourceName) -> Result<(Value, FreshnessToken), SettingsError> {
        match self.specs.get(&source) {
            Some(spec) => (spec.read_snapshot)(),
            None => Ok((Value::Object(serde_json::Map::new()), FreshnessToken::None)),
        }
    }
}
