//! YAML manifest compilation
//!
//! Compiles a raw YAML mapping into an [`EntityTreeManifest`]. Compilation
//! is strict: every key in the document must be consumed, enum mappings are
//! validated against the enum registry, and malformed structure fails loudly
//! here rather than at row-evaluation time.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_yaml::{Mapping, Value};

use crate::manifest::enum_mapping::{EnumOverrides, EnumRegistry};
use crate::manifest::nodes::{
    EntityFilter, EntityTreeManifest, EnumFieldManifest, ExpandableListItemManifest,
    ListItemManifest, ListRelationshipManifest, ManifestNode,
};
use crate::manifest::{ManifestError, ManifestResult};

const FOREACH_KEY: &str = "$foreach";
const FOREACH_ITERABLE_KEY: &str = "$iterable";
const FOREACH_RESULT_KEY: &str = "$result";
const FOREACH_DELIMITER_KEY: &str = "$delimiter";
const JSON_DICT_KEY: &str = "$json_dict";
const CONCAT_KEY: &str = "$concat";
const CONCAT_SEPARATOR_KEY: &str = "$separator";
const CONCAT_VALUES_KEY: &str = "$values";
const ENUM_RAW_TEXT_KEY: &str = "$raw_text";
const ENUM_MAPPINGS_KEY: &str = "$mappings";
const ENUM_IGNORES_KEY: &str = "$ignore";

const CONCAT_DEFAULT_SEPARATOR: &str = "-";

fn string_literal_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r#"^\$literal\("(.+)"\)$"#).expect("static regex is valid"))
}

/// The shape of one buildable entity: its enum-typed fields and whether the
/// entity exists only to wrap an enum value.
#[derive(Debug, Clone, Default)]
pub struct EntitySchema {
    /// Field name to enum type name.
    pub enum_fields: BTreeMap<String, String>,
    /// Enum wrapper entities are dropped entirely when their enum resolves
    /// to nothing.
    pub is_enum_entity: bool,
}

impl EntitySchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enum_field(
        mut self,
        field: impl Into<String>,
        enum_type: impl Into<String>,
    ) -> Self {
        self.enum_fields.insert(field.into(), enum_type.into());
        self
    }

    pub fn enum_entity(mut self) -> Self {
        self.is_enum_entity = true;
        self
    }
}

/// Everything compilation needs beyond the YAML itself: the enum registry,
/// the entity schemas a manifest may reference, and constant args stamped
/// onto every built entity.
#[derive(Debug, Clone, Default)]
pub struct ManifestContext {
    pub enums: EnumRegistry,
    pub entities: BTreeMap<String, EntitySchema>,
    pub common_args: Vec<(String, String)>,
}

impl ManifestContext {
    pub fn new(enums: EnumRegistry) -> Self {
        Self {
            enums,
            entities: BTreeMap::new(),
            common_args: Vec::new(),
        }
    }

    pub fn with_entity(mut self, name: impl Into<String>, schema: EntitySchema) -> Self {
        self.entities.insert(name.into(), schema);
        self
    }

    pub fn with_common_arg(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.common_args.push((field.into(), value.into()));
        self
    }
}

/// Compiles a manifest document. The document must hold exactly one
/// top-level key naming the root entity.
pub fn parse_manifest_yaml(yaml: &str, ctx: &ManifestContext) -> ManifestResult<EntityTreeManifest> {
    let value: Value = serde_yaml::from_str(yaml)?;
    let mapping = as_mapping(value, "manifest document")?;
    let mut root = YamlMap::new(mapping);

    let entity_type = match root.keys().as_slice() {
        [only] => only.clone(),
        keys => {
            return Err(ManifestError::invalid(format!(
                "Expected exactly one top-level entity, found keys {keys:?}"
            )))
        },
    };
    let fields = root.pop_map(&entity_type)?;
    root.ensure_empty("manifest document")?;

    parse_entity_tree(&entity_type, fields, ctx)
}

fn parse_entity_tree(
    entity_type: &str,
    fields: YamlMap,
    ctx: &ManifestContext,
) -> ManifestResult<EntityTreeManifest> {
    let schema = ctx.entities.get(entity_type).ok_or_else(|| {
        ManifestError::invalid(format!("Unknown entity type [{entity_type}]"))
    })?;

    let mut field_manifests = Vec::new();
    for (field_name, raw_value) in fields.into_entries()? {
        let manifest = match raw_value {
            Value::String(raw) => parse_flat_string(&raw),
            Value::Mapping(mapping) => {
                if let Some(enum_type) = schema.enum_fields.get(&field_name) {
                    ManifestNode::EnumField(parse_enum_field(
                        enum_type,
                        YamlMap::new(mapping),
                        ctx,
                    )?)
                } else {
                    parse_mapping_field(&field_name, YamlMap::new(mapping), ctx)?
                }
            },
            Value::Sequence(items) => {
                ManifestNode::ListRelationship(parse_list_relationship(&field_name, items, ctx)?)
            },
            other => {
                return Err(ManifestError::invalid(format!(
                    "Unexpected value for field [{field_name}]: {other:?}"
                )))
            },
        };
        field_manifests.push((field_name, manifest));
    }

    Ok(EntityTreeManifest {
        entity_type: entity_type.to_string(),
        common_args: ctx.common_args.clone(),
        field_manifests,
        filter: schema.is_enum_entity.then_some(EntityFilter::UnmappedEnum),
    })
}

/// A bare string field is either a `$literal("...")` or a column reference.
fn parse_flat_string(raw: &str) -> ManifestNode {
    match string_literal_regex().captures(raw) {
        Some(captures) => ManifestNode::StringLiteral {
            literal_value: captures[1].to_string(),
        },
        None => ManifestNode::DirectMapping {
            mapped_column: raw.to_string(),
        },
    }
}

/// A mapping-valued field is either a `$function` call or a single nested
/// entity.
fn parse_mapping_field(
    field_name: &str,
    mut mapping: YamlMap,
    ctx: &ManifestContext,
) -> ManifestResult<ManifestNode> {
    let key = match mapping.keys().as_slice() {
        [only] => only.clone(),
        keys => {
            return Err(ManifestError::invalid(format!(
                "Expected exactly one key for field [{field_name}], found {keys:?}"
            )))
        },
    };

    if key == JSON_DICT_KEY {
        let args = mapping.pop_map(&key)?;
        mapping.ensure_empty(field_name)?;
        let mut column_manifests = Vec::new();
        for (json_key, raw_value) in args.into_entries()? {
            column_manifests.push((json_key, parse_flat_value(raw_value, ctx)?));
        }
        return Ok(ManifestNode::SerializedJsonDict { column_manifests });
    }
    if key == CONCAT_KEY {
        let mut args = mapping.pop_map(&key)?;
        mapping.ensure_empty(field_name)?;
        let separator = args
            .pop_optional_string(CONCAT_SEPARATOR_KEY)?
            .unwrap_or_else(|| CONCAT_DEFAULT_SEPARATOR.to_string());
        let raw_values = args.pop_sequence(CONCAT_VALUES_KEY)?;
        args.ensure_empty(CONCAT_KEY)?;
        let value_manifests = raw_values
            .into_iter()
            .map(|raw| parse_flat_value(raw, ctx))
            .collect::<ManifestResult<Vec<_>>>()?;
        return Ok(ManifestNode::ConcatenatedStrings {
            separator,
            value_manifests,
        });
    }
    if ctx.entities.contains_key(&key) {
        let child_fields = mapping.pop_map(&key)?;
        mapping.ensure_empty(field_name)?;
        let child = parse_entity_tree(&key, child_fields, ctx)?;
        return Ok(ManifestNode::EntityTree(Box::new(child)));
    }

    Err(ManifestError::invalid(format!(
        "Unexpected key [{key}] for field [{field_name}]"
    )))
}

/// A flat (string-producing) manifest value: a bare string or a `$function`
/// mapping. Nested entities are not allowed here.
fn parse_flat_value(raw: Value, ctx: &ManifestContext) -> ManifestResult<ManifestNode> {
    match raw {
        Value::String(raw) => Ok(parse_flat_string(&raw)),
        Value::Mapping(mapping) => {
            let node = parse_mapping_field("<flat value>", YamlMap::new(mapping), ctx)?;
            if matches!(node, ManifestNode::EntityTree(_)) {
                return Err(ManifestError::invalid(
                    "Entity trees cannot be used where a string value is expected",
                ));
            }
            Ok(node)
        },
        other => Err(ManifestError::invalid(format!(
            "Unexpected flat value: {other:?}"
        ))),
    }
}

fn parse_enum_field(
    enum_type: &str,
    mut block: YamlMap,
    ctx: &ManifestContext,
) -> ManifestResult<EnumFieldManifest> {
    let raw_text_manifest = parse_flat_value(block.pop(ENUM_RAW_TEXT_KEY)?, ctx)?;

    let mut builder = EnumOverrides::builder();
    let mappings = block.pop_map(ENUM_MAPPINGS_KEY)?;
    for (mapping_key, raw_value) in mappings.into_entries()? {
        let (declared_type, variant) = mapping_key.split_once('.').ok_or_else(|| {
            ManifestError::invalid(format!(
                "Expected enum mapping key of the form EnumType.VARIANT, found [{mapping_key}]"
            ))
        })?;
        if declared_type != enum_type {
            return Err(ManifestError::EnumTypeMismatch {
                expected: enum_type.to_string(),
                found: declared_type.to_string(),
            });
        }
        ctx.enums.validate_variant(enum_type, variant)?;

        let raw_texts: Vec<String> = match raw_value {
            Value::String(raw_text) => vec![raw_text],
            Value::Sequence(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(raw_text) if !raw_text.is_empty() => Ok(raw_text),
                    other => Err(ManifestError::invalid(format!(
                        "Unexpected raw text value in mapping for [{mapping_key}]: {other:?}"
                    ))),
                })
                .collect::<ManifestResult<_>>()?,
            other => {
                return Err(ManifestError::invalid(format!(
                    "Unexpected mapping value for [{mapping_key}]: {other:?}"
                )))
            },
        };
        for raw_text in raw_texts {
            builder = builder.map(raw_text, variant);
        }
    }

    if let Some(ignores) = block.pop_optional_sequence(ENUM_IGNORES_KEY)? {
        for item in ignores {
            match item {
                Value::String(raw_text) => builder = builder.ignore(raw_text),
                other => {
                    return Err(ManifestError::invalid(format!(
                        "Unexpected ignore value: {other:?}"
                    )))
                },
            }
        }
    }
    block.ensure_empty("enum field")?;

    Ok(EnumFieldManifest {
        enum_type: enum_type.to_string(),
        overrides: builder.build(),
        raw_text_manifest: Box::new(raw_text_manifest),
    })
}

fn parse_list_relationship(
    field_name: &str,
    items: Vec<Value>,
    ctx: &ManifestContext,
) -> ManifestResult<ListRelationshipManifest> {
    let mut children = Vec::new();
    for item in items {
        let mapping = as_mapping(item, field_name)?;
        let mut map = YamlMap::new(mapping);
        let key = match map.keys().as_slice() {
            [only] => only.clone(),
            keys => {
                return Err(ManifestError::invalid(format!(
                    "Expected exactly one key per list item in [{field_name}], found {keys:?}"
                )))
            },
        };

        if key == FOREACH_KEY {
            let mut block = map.pop_map(&key)?;
            map.ensure_empty(field_name)?;

            let mapped_column = block.pop_string(FOREACH_ITERABLE_KEY)?;
            let delimiter = block
                .pop_optional_string(FOREACH_DELIMITER_KEY)?
                .unwrap_or_else(|| ExpandableListItemManifest::DEFAULT_DELIMITER.to_string());
            let mut result = YamlMap::new(as_mapping(
                block.pop(FOREACH_RESULT_KEY)?,
                FOREACH_RESULT_KEY,
            )?);
            block.ensure_empty(FOREACH_KEY)?;

            let entity_type = match result.keys().as_slice() {
                [only] => only.clone(),
                keys => {
                    return Err(ManifestError::invalid(format!(
                        "Expected exactly one entity under {FOREACH_RESULT_KEY}, found {keys:?}"
                    )))
                },
            };
            let child_fields = result.pop_map(&entity_type)?;
            result.ensure_empty(FOREACH_RESULT_KEY)?;

            children.push(ListItemManifest::Foreach(ExpandableListItemManifest {
                mapped_column,
                delimiter,
                child: parse_entity_tree(&entity_type, child_fields, ctx)?,
            }));
        } else if ctx.entities.contains_key(&key) {
            let child_fields = map.pop_map(&key)?;
            map.ensure_empty(field_name)?;
            children.push(ListItemManifest::Entity(parse_entity_tree(
                &key,
                child_fields,
                ctx,
            )?));
        } else {
            return Err(ManifestError::invalid(format!(
                "Unexpected list item key [{key}] in [{field_name}]"
            )));
        }
    }
    Ok(ListRelationshipManifest { children })
}

fn as_mapping(value: Value, context: &str) -> ManifestResult<Mapping> {
    match value {
        Value::Mapping(mapping) => Ok(mapping),
        other => Err(ManifestError::invalid(format!(
            "Expected a mapping for [{context}], found {other:?}"
        ))),
    }
}

/// Pop-based access to a YAML mapping. Every key must be consumed; whatever
/// is left when `ensure_empty` runs is a configuration error.
#[derive(Debug)]
struct YamlMap {
    mapping: Mapping,
}

impl YamlMap {
    fn new(mapping: Mapping) -> Self {
        Self { mapping }
    }

    fn keys(&self) -> Vec<String> {
        self.mapping
            .keys()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect()
    }

    fn pop(&mut self, key: &str) -> ManifestResult<Value> {
        self.pop_optional(key)
            .ok_or_else(|| ManifestError::invalid(format!("Missing required key [{key}]")))
    }

    fn pop_optional(&mut self, key: &str) -> Option<Value> {
        self.mapping.remove(key)
    }

    fn pop_string(&mut self, key: &str) -> ManifestResult<String> {
        match self.pop(key)? {
            Value::String(s) => Ok(s),
            other => Err(ManifestError::invalid(format!(
                "Expected a string for [{key}], found {other:?}"
            ))),
        }
    }

    fn pop_optional_string(&mut self, key: &str) -> ManifestResult<Option<String>> {
        match self.pop_optional(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(ManifestError::invalid(format!(
                "Expected a string for [{key}], found {other:?}"
            ))),
        }
    }

    fn pop_map(&mut self, key: &str) -> ManifestResult<YamlMap> {
        Ok(YamlMap::new(as_mapping(self.pop(key)?, key)?))
    }

    fn pop_sequence(&mut self, key: &str) -> ManifestResult<Vec<Value>> {
        match self.pop(key)? {
            Value::Sequence(items) => Ok(items),
            other => Err(ManifestError::invalid(format!(
                "Expected a list for [{key}], found {other:?}"
            ))),
        }
    }

    fn pop_optional_sequence(&mut self, key: &str) -> ManifestResult<Option<Vec<Value>>> {
        match self.pop_optional(key) {
            None => Ok(None),
            Some(Value::Sequence(items)) => Ok(Some(items)),
            Some(other) => Err(ManifestError::invalid(format!(
                "Expected a list for [{key}], found {other:?}"
            ))),
        }
    }

    /// Consumes the map, yielding entries in declaration order. Non-string
    /// keys are rejected.
    fn into_entries(self) -> ManifestResult<Vec<(String, Value)>> {
        self.mapping
            .into_iter()
            .map(|(key, value)| match key {
                Value::String(key) => Ok((key, value)),
                other => Err(ManifestError::invalid(format!(
                    "Expected a string key, found {other:?}"
                ))),
            })
            .collect()
    }

    fn ensure_empty(&self, context: &str) -> ManifestResult<()> {
        if self.mapping.is_empty() {
            Ok(())
        } else {
            Err(ManifestError::invalid(format!(
                "Found unused keys in [{context}]: {:?}",
                self.keys()
            )))
        }
    }
}
