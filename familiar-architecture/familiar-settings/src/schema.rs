//! The dynamic schema assembler: composes registered sections into a single
//! validated root.
//!
//! Grounded on `original_source/.../schema_builder.py`. Where the original
//! uses `pydantic.create_model` to synthesize a root type at runtime, this
//! port assembles a tree of `SchemaNode`s carrying type-erased validator
//! closures (see `registry::validator_for`), per SPEC_FULL.md §9 "Dynamic
//! model assembly".

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::SettingsError;
use crate::path::CONTROL_ROOT;
use crate::registry::{RegisteredSection, SectionKind, SectionValidator};

/// One node of the assembled schema tree.
pub enum SchemaNode {
    /// An object section (or a pure branching node with no section of its
    /// own): `validator` is `Some` only when a model was declared exactly at
    /// this path.
    Object {
        validator: Option<SectionValidator>,
        children: BTreeMap<String, SchemaNode>,
    },
    /// A map section: every key's value is validated independently; map
    /// nodes never carry children.
    Map { validator: SectionValidator },
    /// The reserved control root: always present, never validated, copied
    /// through as-is so control reads work before any declarations exist.
    ControlLeaf,
}

pub struct BuiltSchema {
    pub root: SchemaNode,
    pub sections: Vec<RegisteredSection>,
}

impl BuiltSchema {
    /// Validate a raw effective-projection mapping against this schema,
    /// returning the typed root as a `serde_json::Value` tree.
    pub fn validate(&self, raw: &Value) -> Result<Value, SettingsError> {
        apply_node(&self.root, raw)
    }
}

#[derive(Default)]
struct TreeNode {
    decl: Option<RegisteredSection>,
    children: BTreeMap<String, TreeNode>,
}

pub fn build_schema(sections: &[RegisteredSection]) -> Result<BuiltSchema, SettingsError> {
    let mut ordered: Vec<RegisteredSection> = sections.to_vec();
    ordered.sort_by(|a, b| a.path.cmp(&b.path));

    let mut root = TreeNode::default();
    for section in &ordered {
        insert_section(&mut root, section)?;
    }
    check_collisions(&root)?;

    let mut built_root = build_node(&root);
    if let SchemaNode::Object { children, .. } = &mut built_root {
        children.insert(CONTROL_ROOT.to_string(), SchemaNode::ControlLeaf);
    }

    Ok(BuiltSchema { root: built_root, sections: ordered })
}

fn insert_section(root: &mut TreeNode, section: &RegisteredSection) -> Result<(), SettingsError> {
    let mut current = root;
    for part in section.path.segments() {
        if let Some(decl) = &current.decl {
            if decl.kind == SectionKind::Map {
                return Err(SettingsError::registration(
                    section.path_text(),
                    format!(
                        "map section '{}' cannot have nested section '{}'",
                        decl.path_text(),
                        section.path_text()
                    ),
                ));
            }
        }
        current = current.children.entry(part.clone()).or_default();
    }

    if !current.children.is_empty() && section.kind == SectionKind::Map {
        return Err(SettingsError::registration(
            section.path_text(),
            format!("map section '{}' conflicts with existing nested declarations", section.path_text()),
        ));
    }

    current.decl = Some(section.clone());
    Ok(())
}

fn check_collisions(node: &TreeNode) -> Result<(), SettingsError> {
    if let Some(decl) = &node.decl {
        if decl.kind != SectionKind::Map {
            for child_name in node.children.keys() {
                if decl.field_names.contains(child_name) {
                    return Err(SettingsError::registration(
                        decl.path_text(),
                        format!(
                            "nested declaration '{}.{}' conflicts with existing field '{}'",
                            decl.path_text(),
                            child_name,
                            child_name
                        ),
                    ));
                }
            }
        }
    }
    for child in node.children.values() {
        check_collisions(child)?;
    }
    Ok(())
}

fn build_node(node: &TreeNode) -> SchemaNode {
    if let Some(decl) = &node.decl {
        if decl.kind == SectionKind::Map {
            return SchemaNode::Map { validator: decl.validator.clone() };
        }
    }

    let children = node.children.iter().map(|(name, child)| (name.clone(), build_node(child))).collect();
    SchemaNode::Object {
        validator: node.decl.as_ref().map(|decl| decl.validator.clone()),
        children,
    }
}

fn apply_node(node: &SchemaNode, raw: &Value) -> Result<Value, SettingsError> {
    match node {
        SchemaNode::ControlLeaf => Ok(raw.clone()),
        SchemaNode::Map { validator } => {
            let entries = raw.as_object().cloned().unwrap_or_default();
            let mut out = Map::new();
            for (key, value) in entries {
                out.insert(key, validator(&value)?);
            }
            Ok(Value::Object(out))
        }
        SchemaNode::Object { validator, children } => {
            let base = match validator {
                Some(validate) => validate(raw)?,
                None => Value::Object(Map::new()),
            };
            let mut merged = base.as_object().cloned().unwrap_or_default();
            for (name, child) in children {
                let child_raw = match raw {
                    Value::Object(map) => map.get(name).cloned().unwrap_or_else(|| Value::Object(Map::new())),
                    _ => Value::Object(Map::new()),
                };
                merged.insert(name.clone(), apply_node(child, &child_raw)?);
            }
            Ok(Value::Object(merged))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Path;
    use crate::registry::SchemaRegistry;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::any::TypeId;

    #[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
    struct AppSection {
        name: String,
        #[serde(default)]
        port: i64,
    }

    #[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
    struct WorkerSection {
        concurrency: i64,
    }

    fn make_section(path: &str, kind: SectionKind, type_id: TypeId, field_names: &[&str], validator: SectionValidator) -> RegisteredSection {
        RegisteredSection {
            raw_path: path.to_string(),
            path: Path::from_dotted(path).unwrap(),
            model_id: type_id,
            field_names: field_names.iter().map(|s| s.to_string()).collect(),
            kind,
            owner_key: "test".to_string(),
            owner_generation: 1,
            validator,
        }
    }

    #[test]
    fn assembles_object_tree_with_always_present_control_leaf() {
        let mut registry = SchemaRegistry::new();
        registry.register_section::<AppSection>("app", SectionKind::Object, "owner", 1).unwrap();
        let built = build_schema(&registry.sections()).unwrap();
        let validated = built.validate(&json!({"app": {"name": "demo"}})).unwrap();
        assert_eq!(validated["app"]["name"], "demo");
        assert_eq!(validated["fastapiex"], json!({}));
    }

    #[test]
    fn control_leaf_passes_through_arbitrary_nested_data() {
        let schema = build_schema(&[]).unwrap();
        let raw = json!({"fastapiex": {"settings": {"reload": "always"}}});
        let validated = schema.validate(&raw).unwrap();
        assert_eq!(validated["fastapiex"]["settings"]["reload"], "always");
    }

    #[test]
    fn map_section_rejects_nested_children() {
        use crate::registry::validator_for;
        let mut root = TreeNode::default();
        let map_section = make_section("workers", SectionKind::Map, TypeId::of::<WorkerSection>(), &["concurrency"], validator_for::<WorkerSection>("workers".into()));
        insert_section(&mut root, &map_section).unwrap();
        let nested = make_section("workers.extra", SectionKind::Object, TypeId::of::<AppSection>(), &["name"], validator_for::<AppSection>("workers.extra".into()));
        assert!(insert_section(&mut root, &nested).is_err());
    }

    #[test]
    fn field_child_collision_is_rejected() {
        let mut registry = SchemaRegistry::new();
        registry.register_section::<AppSection>("app", SectionKind::Object, "owner", 1).unwrap();
        registry.register_section::<WorkerSection>("app.port", SectionKind::Object, "owner2", 1).unwrap();
        let err = build_schema(&registry.sections()).unwrap_err();
        assert!(matches!(err, SettingsError::Registration { .. }));
    }

    #[test]
    fn map_section_validates_every_entry() {
        let mut registry = SchemaRegistry::new();
        registry.register_section::<WorkerSection>("workers", SectionKind::Map, "owner", 1).unwrap();
        let built = build_schema(&registry.sections()).unwrap();
        let validated = built
            .validate(&json!({"workers": {"a": {"concurrency": 2}, "b": {"concurrency": 4}}}))
            .unwrap();
        assert_eq!(validated["workers"]["a"]["concurrency"], 2);
        assert_eq!(validated["workers"]["b"]["concurrency"], 4);
    }
}
