//! `SettingsRef<T>`: a lazy, re-resolving handle over a resolve request.
//!
//! Grounded on `original_source/.../refs.py::SettingsRef`. Application code
//! holds one of these as a named constant; every `.get()` re-resolves
//! against the live manager state rather than snapshotting a value at
//! construction time, which matters for values read inside hot loops across
//! reloads.

use std::any::type_name;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::SettingsError;
use crate::manager::SettingsManager;
use crate::query::{ResolveApi, ResolveTarget};

/// A lazy reference to a settings query. Carries no borrow on the manager;
/// cheap to clone and safe to share across threads.
#[derive(Clone)]
pub struct SettingsRef<T> {
    target: RefTarget,
    field: Option<String>,
    default: Option<Value>,
    _marker: PhantomData<fn() -> T>,
}

#[derive(Clone)]
enum RefTarget {
    Path(String),
    Type { type_id: std::any::TypeId, name: &'static str },
}

impl<T: DeserializeOwned + 'static> SettingsRef<T> {
    /// A reference resolved by dotted string path.
    pub fn path(target: impl Into<String>) -> Self {
        Self {
            target: RefTarget::Path(target.into()),
            field: None,
            default: None,
            _marker: PhantomData,
        }
    }

    /// A reference resolved by the declared section's type `T`.
    pub fn for_type() -> Self {
        Self {
            target: RefTarget::Type { type_id: std::any::TypeId::of::<T>(), name: type_name::<T>() },
            field: None,
            default: None,
            _marker: PhantomData,
        }
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn default_value(mut self, default: T) -> Self
    where
        T: serde::Serialize,
    {
        self.default = serde_json::to_value(default).ok();
        self
    }

    fn request_target(&self) -> ResolveTarget {
        match &self.target {
            RefTarget::Path(path) => ResolveTarget::Path(path.clone()),
            RefTarget::Type { type_id, name } => ResolveTarget::Type(*type_id, name),
        }
    }

    /// Resolve against the global manager, deserializing into `T`.
    pub fn get(&self) -> Result<T, SettingsError> {
        self.get_from(SettingsManager::global())
    }

    /// Resolve against an explicit manager handle (used in tests that avoid
    /// the process-wide singleton).
    pub fn get_from(&self, manager: &SettingsManager) -> Result<T, SettingsError> {
        let value = manager.resolve_value(self.request_target(), self.field.clone(), self.default.clone(), ResolveApi::Value)?;
        serde_json::from_value(value).map_err(|err| SettingsError::resolve(self.describe(), err.to_string()))
    }

    fn describe(&self) -> String {
        match &self.target {
            RefTarget::Path(path) => path.clone(),
            RefTarget::Type { name, .. } => (*name).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
    struct Probe {
        value: i64,
    }

    #[test]
    fn path_ref_resolves_against_an_explicit_manager() {
        let manager = SettingsManager::new();
        let dir = tempfile::tempdir().unwrap();
        let settings_path = dir.path().join("settings.yaml");
        std::fs::write(&settings_path, "probe:\n  value: 42\n").unwrap();
        manager.init(Some(settings_path.to_string_lossy().to_string()), None).unwrap();

        let reference: SettingsRef<Probe> = SettingsRef::path("probe");
        let resolved = reference.get_from(&manager).unwrap();
        assert_eq!(resolved, Probe { value: 42 });
    }

    #[test]
    fn default_is_used_when_path_is_missing() {
        let manager = SettingsManager::new();
        let dir = tempfile::tempdir().unwrap();
        let settings_path = dir.path().join("settings.yaml");
        std::fs::write(&settings_path, "app: {}\n").unwrap();
        manager.init(Some(settings_path.to_string_lossy().to_string()), None).unwrap();

        let reference: SettingsRef<Probe> = SettingsRef::path("missing.probe").default_value(Probe { value: 7 });
        let resolved = reference.get_from(&manager).unwrap();
        assert_eq!(resolved, Probe { value: 7 });
    }
}
