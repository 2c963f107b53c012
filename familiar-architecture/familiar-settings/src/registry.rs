//! The schema registry: owner-scoped declaration of typed settings sections.
//!
//! Grounded on `original_source/.../registry.py`. The dynamic-model pieces
//! (`model_id`, per-section validator) stand in for `pydantic`'s runtime
//! model identity, per SPEC_FULL.md §9 "Dynamic model assembly".

use std::any::TypeId;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::SettingsError;
use crate::path::Path;

/// Whether a declared section holds a single typed record, or a mapping from
/// string key to a typed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Object,
    Map,
}

/// Blanket-implemented for any type that can stand at a settings section:
/// round-trips through `serde_json::Value` and exposes its field names via
/// `schemars` for assembly-time collision detection.
pub trait SectionModel: DeserializeOwned + Serialize + JsonSchema + 'static {}
impl<T> SectionModel for T where T: DeserializeOwned + Serialize + JsonSchema + 'static {}

/// Type-erased validator: reparses a `serde_json::Value` through a concrete
/// `T` and back, surfacing a `SettingsError::Validation` on mismatch.
pub type SectionValidator = Arc<dyn Fn(&Value) -> Result<Value, SettingsError> + Send + Sync>;

pub fn validator_for<T: SectionModel>(path_text: String) -> SectionValidator {
    Arc::new(move |value: &Value| {
        let typed: T = serde_json::from_value(value.clone())
            .map_err(|err| SettingsError::validation(path_text.clone(), err.to_string()))?;
        serde_json::to_value(&typed).map_err(|err| SettingsError::validation(path_text.clone(), err.to_string()))
    })
}

fn field_names_of<T: JsonSchema>() -> BTreeSet<String> {
    let mut generator = SchemaGenerator::default();
    let schema = T::json_schema(&mut generator);
    match schema {
        Schema::Object(obj) => obj
            .object
            .map(|sub| sub.properties.keys().cloned().collect())
            .unwrap_or_default(),
        Schema::Bool(_) => BTreeSet::new(),
    }
}

#[derive(Clone)]
struct SectionRecord {
    raw_path: String,
    model_id: TypeId,
    field_names: BTreeSet<String>,
    kind: SectionKind,
    owner_key: String,
    owner_generation: u64,
    validator: SectionValidator,
}

impl PartialEq for SectionRecord {
    fn eq(&self, other: &Self) -> bool {
        self.raw_path == other.raw_path
            && self.model_id == other.model_id
            && self.kind == other.kind
            && self.owner_key == other.owner_key
            && self.owner_generation == other.owner_generation
    }
}

/// A fully canonicalised, indexed section, as exposed by `sections()`.
#[derive(Clone)]
pub struct RegisteredSection {
    pub raw_path: String,
    pub path: Path,
    pub model_id: TypeId,
    pub field_names: BTreeSet<String>,
    pub kind: SectionKind,
    pub owner_key: String,
    pub owner_generation: u64,
    pub validator: SectionValidator,
}

impl RegisteredSection {
    pub fn path_text(&self) -> String {
        self.path.text()
    }
}

/// An application-supplied owner of a batch of section declarations. The
/// Rust equivalent of the original's decorator-time registration (see
/// SPEC_FULL.md §9 "Decorator-style registration"): implement this once per
/// module/component and hand it to `SettingsManager::declare_section`.
pub trait OwnerDiscovery {
    /// A stable key identifying this owner (e.g. a module path).
    fn owner_key(&self) -> &str;
    /// Monotonic generation; a new generation supersedes the previous one's
    /// declarations for the same `owner_key`.
    fn generation(&self) -> u64;
    /// Declare this owner's sections into `registry`.
    fn declare(&self, registry: &mut SchemaRegistry) -> Result<(), SettingsError>;
}

/// Process-global (or per-manager) declaration registry with owner-based
/// lifecycle.
#[derive(Default)]
pub struct SchemaRegistry {
    records_by_model: BTreeMap<TypeId, SectionRecord>,
    sections_by_path: BTreeMap<Path, RegisteredSection>,
    version: u64,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Registered sections, sorted lexicographically by canonical path.
    pub fn sections(&self) -> Vec<RegisteredSection> {
        self.sections_by_path.values().cloned().collect()
    }

    pub fn register_section<T: SectionModel>(
        &mut self,
        raw_path: &str,
        kind: SectionKind,
        owner_key: &str,
        owner_generation: u64,
    ) -> Result<(), SettingsError> {
        let model_id = TypeId::of::<T>();
        let field_names = field_names_of::<T>();
        let validator = validator_for::<T>(raw_path.to_string());

        let candidate = SectionRecord {
            raw_path: raw_path.to_string(),
            model_id,
            field_names,
            kind,
            owner_key: owner_key.to_string(),
            owner_generation,
            validator,
        };

        let previous_records = self.records_by_model.clone();
        let previous_sections = self.sections_by_path.clone();
        let previous_version = self.version;

        for (existing_model, existing_record) in self.records_by_model.clone() {
            if existing_record.owner_key != owner_key {
                continue;
            }
            if existing_record.owner_generation == owner_generation {
                continue;
            }
            self.records_by_model.remove(&existing_model);
        }

        if self.records_by_model.get(&model_id) == Some(&candidate) {
            return Ok(());
        }

        self.records_by_model.insert(model_id, candidate);

        if let Err(err) = self.reindex() {
            self.records_by_model = previous_records;
            self.sections_by_path = previous_sections;
            self.version = previous_version;
            return Err(err);
        }

        Ok(())
    }

    pub fn unregister_owner(&mut self, owner_key: &str, owner_generation: Option<u64>) {
        let mut removed = false;
        for (model_id, record) in self.records_by_model.clone() {
            if record.owner_key != owner_key {
                continue;
            }
            if let Some(generation) = owner_generation {
                if record.owner_generation != generation {
                    continue;
                }
            }
            self.records_by_model.remove(&model_id);
            removed = true;
        }

        if removed {
            let _ = self.reindex();
        }
    }

    fn reindex(&mut self) -> Result<(), SettingsError> {
        let mut new_sections: BTreeMap<Path, RegisteredSection> = BTreeMap::new();

        for record in self.records_by_model.values() {
            let path = Path::from_dotted(&record.raw_path)?;
            if path.is_control_root() {
                return Err(SettingsError::registration(
                    record.raw_path.clone(),
                    format!("section path '{}' uses the reserved control root", record.raw_path),
                ));
            }

            let section = RegisteredSection {
                raw_path: record.raw_path.clone(),
                path: path.clone(),
                model_id: record.model_id,
                field_names: record.field_names.clone(),
                kind: record.kind,
                owner_key: record.owner_key.clone(),
                owner_generation: record.owner_generation,
                validator: record.validator.clone(),
            };

            if let Some(existing) = new_sections.get(&path) {
                if existing.model_id != record.model_id {
                    return Err(SettingsError::registration(
                        record.raw_path.clone(),
                        format!(
                            "duplicate section '{}' declared by incompatible models",
                            path.text()
                        ),
                    ));
                }
            }
            new_sections.insert(path, section);
        }

        self.sections_by_path = new_sections;
        self.version += 1;
        Ok(())
    }
}
