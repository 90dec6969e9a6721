//! Compiled manifest node tree and per-row evaluation

use std::collections::{BTreeMap, HashMap};

use crate::manifest::entity::{Entity, FieldValue};
use crate::manifest::enum_mapping::{EnumOverrides, EnumParseToken};
use crate::manifest::{ManifestError, ManifestResult};

/// Column name under which a `$foreach` loop exposes the current list
/// element to its body.
pub const FOREACH_LOOP_VALUE_NAME: &str = "$iter";

/// Placeholder substituted for an absent value inside `$concat`.
const CONCAT_NONE_PLACEHOLDER: &str = "NONE";

/// A read-only view over one flat row, plus the loop value when evaluation
/// is inside a `$foreach` body. The underlying column map is never touched,
/// so a row is bit-identical before and after evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a HashMap<String, String>,
    loop_value: Option<&'a str>,
}

impl<'a> Row<'a> {
    pub fn new(columns: &'a HashMap<String, String>) -> Self {
        Self {
            columns,
            loop_value: None,
        }
    }

    /// The raw value of a column. Referencing a column the row does not have
    /// is an error; an empty value is not.
    pub fn value(&self, column: &str) -> ManifestResult<&'a str> {
        if column == FOREACH_LOOP_VALUE_NAME {
            return self.loop_value.ok_or(ManifestError::LoopValueOutsideForeach);
        }
        self.columns
            .get(column)
            .map(String::as_str)
            .ok_or_else(|| ManifestError::MissingColumn(column.to_string()))
    }

    /// A row scoped to one `$foreach` iteration. Nesting is rejected, both
    /// via an active loop value and via a literal loop-value column in the
    /// source row.
    fn enter_foreach(&self, loop_value: &'a str) -> ManifestResult<Row<'a>> {
        if self.loop_value.is_some() || self.columns.contains_key(FOREACH_LOOP_VALUE_NAME) {
            return Err(ManifestError::NestedForeach);
        }
        Ok(Row {
            columns: self.columns,
            loop_value: Some(loop_value),
        })
    }
}

/// One compiled manifest expression. Evaluation returns `None` for "this
/// field has no value on this row"; containers treat `None` children
/// according to their own rules.
#[derive(Debug, Clone)]
pub enum ManifestNode {
    /// Reads a column verbatim; empty string evaluates to no value.
    DirectMapping { mapped_column: String },
    /// A constant, identical for every row.
    StringLiteral { literal_value: String },
    EnumField(EnumFieldManifest),
    /// Serializes named columns as a JSON object with sorted keys. Absent
    /// values serialize as empty strings, so output shape is row-invariant.
    SerializedJsonDict { column_manifests: Vec<(String, ManifestNode)> },
    /// Joins child values with a separator, substituting "NONE" for absent
    /// children. Always produces a value.
    ConcatenatedStrings {
        separator: String,
        value_manifests: Vec<ManifestNode>,
    },
    EntityTree(Box<EntityTreeManifest>),
    ListRelationship(ListRelationshipManifest),
}

impl ManifestNode {
    pub fn build_from_row(&self, row: &Row<'_>) -> ManifestResult<Option<FieldValue>> {
        match self {
            ManifestNode::DirectMapping { mapped_column } => {
                let value = row.value(mapped_column)?;
                if value.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(FieldValue::String(value.to_string())))
                }
            },
            ManifestNode::StringLiteral { literal_value } => {
                Ok(Some(FieldValue::String(literal_value.clone())))
            },
            ManifestNode::EnumField(manifest) => manifest
                .build_from_row(row)
                .map(|token| Some(FieldValue::Enum(token))),
            ManifestNode::SerializedJsonDict { column_manifests } => {
                let mut dict = BTreeMap::new();
                for (key, manifest) in column_manifests {
                    let value = manifest.build_string(row)?.unwrap_or_default();
                    dict.insert(key.as_str(), value);
                }
                // Keys sorted, ", " and ": " separators. Output strings are
                // compared byte-for-byte across exports, so the layout is
                // part of the contract.
                let mut out = String::from("{");
                for (i, (key, value)) in dict.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&serde_json::to_string(key)?);
                    out.push_str(": ");
                    out.push_str(&serde_json::to_string(value)?);
                }
                out.push('}');
                Ok(Some(FieldValue::String(out)))
            },
            ManifestNode::ConcatenatedStrings {
                separator,
                value_manifests,
            } => {
                let mut parts = Vec::with_capacity(value_manifests.len());
                for manifest in value_manifests {
                    let part = manifest
                        .build_string(row)?
                        .unwrap_or_else(|| CONCAT_NONE_PLACEHOLDER.to_string());
                    parts.push(part);
                }
                Ok(Some(FieldValue::String(parts.join(separator))))
            },
            ManifestNode::EntityTree(manifest) => Ok(manifest
                .build_from_row(row)?
                .map(|entity| FieldValue::Entity(Box::new(entity)))),
            ManifestNode::ListRelationship(manifest) => {
                let entities = manifest.build_from_row(row)?;
                if entities.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(FieldValue::EntityList(entities)))
                }
            },
        }
    }

    /// Evaluates to a plain string for string-valued contexts ($concat and
    /// $json_dict children). Entity-valued nodes are rejected at parse time
    /// so they cannot reach this.
    fn build_string(&self, row: &Row<'_>) -> ManifestResult<Option<String>> {
        match self.build_from_row(row)? {
            None => Ok(None),
            Some(FieldValue::String(s)) => Ok(Some(s)),
            Some(FieldValue::Enum(token)) => token.parse(),
            Some(FieldValue::Entity(_)) | Some(FieldValue::EntityList(_)) => Err(
                ManifestError::invalid("Entity-valued expressions cannot be used as strings"),
            ),
        }
    }
}

/// An enum field: a string expression for the raw text, the enum type, and
/// the raw-text mappings.
#[derive(Debug, Clone)]
pub struct EnumFieldManifest {
    pub enum_type: String,
    pub overrides: EnumOverrides,
    pub raw_text_manifest: Box<ManifestNode>,
}

impl EnumFieldManifest {
    fn build_from_row(&self, row: &Row<'_>) -> ManifestResult<EnumParseToken> {
        let raw_text = self.raw_text_manifest.build_string(row)?;
        Ok(EnumParseToken {
            raw_text,
            enum_type: self.enum_type.clone(),
            overrides: self.overrides.clone(),
        })
    }
}

/// Drops a built entity when a condition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityFilter {
    /// Drop the entity when it has enum fields and every one of them
    /// resolves to no variant. Keeps wrapper entities that exist only to
    /// carry an enum from surviving an ignored raw value.
    UnmappedEnum,
}

impl EntityFilter {
    fn should_drop(&self, entity: &Entity) -> ManifestResult<bool> {
        match self {
            EntityFilter::UnmappedEnum => {
                let mut saw_enum_field = false;
                for (_, token) in entity.enum_fields() {
                    saw_enum_field = true;
                    if token.parse()?.is_some() {
                        return Ok(false);
                    }
                }
                Ok(saw_enum_field)
            },
        }
    }
}

/// Builds one entity from a row: the entity type, always-set common args,
/// per-field expressions, and an optional drop filter.
#[derive(Debug, Clone)]
pub struct EntityTreeManifest {
    pub entity_type: String,
    /// Constant (field, value) pairs applied before field manifests; a field
    /// manifest for the same name wins.
    pub common_args: Vec<(String, String)>,
    /// Field manifests in declaration order.
    pub field_manifests: Vec<(String, ManifestNode)>,
    pub filter: Option<EntityFilter>,
}

impl EntityTreeManifest {
    /// Builds the entity, or `None` when the filter drops it.
    pub fn build_from_row(&self, row: &Row<'_>) -> ManifestResult<Option<Entity>> {
        let mut entity = Entity::new(self.entity_type.clone());
        for (field, value) in &self.common_args {
            entity
                .fields
                .insert(field.clone(), FieldValue::String(value.clone()));
        }
        // A field result that builds to nothing leaves any common arg of the
        // same name in place.
        for (field, manifest) in &self.field_manifests {
            if let Some(value) = manifest.build_from_row(row)? {
                entity.fields.insert(field.clone(), value);
            }
        }

        if let Some(filter) = &self.filter {
            if filter.should_drop(&entity)? {
                return Ok(None);
            }
        }
        Ok(Some(entity))
    }
}

/// A list-valued field: fixed entity items plus `$foreach` expansions, in
/// declaration order. Items that build to nothing are omitted.
#[derive(Debug, Clone)]
pub struct ListRelationshipManifest {
    pub children: Vec<ListItemManifest>,
}

impl ListRelationshipManifest {
    pub fn build_from_row(&self, row: &Row<'_>) -> ManifestResult<Vec<Entity>> {
        let mut entities = Vec::new();
        for child in &self.children {
            match child {
                ListItemManifest::Entity(manifest) => {
                    if let Some(entity) = manifest.build_from_row(row)? {
                        entities.push(entity);
                    }
                },
                ListItemManifest::Foreach(manifest) => {
                    entities.extend(manifest.expand(row)?);
                },
            }
        }
        Ok(entities)
    }
}

#[derive(Debug, Clone)]
pub enum ListItemManifest {
    Entity(EntityTreeManifest),
    Foreach(ExpandableListItemManifest),
}

/// A `$foreach` list item: splits a delimited column and builds the child
/// manifest once per element, exposing the element as the loop value.
#[derive(Debug, Clone)]
pub struct ExpandableListItemManifest {
    pub mapped_column: String,
    pub delimiter: String,
    pub child: EntityTreeManifest,
}

impl ExpandableListItemManifest {
    pub const DEFAULT_DELIMITER: &'static str = ",";

    pub fn expand(&self, row: &Row<'_>) -> ManifestResult<Vec<Entity>> {
        let raw = row.value(&self.mapped_column)?;
        // An empty column expands to no iterations at all, before any
        // nesting check runs.
        if raw.is_empty() {
            return Ok(Vec::new());
        }

        let mut entities = Vec::new();
        for element in raw.split(self.delimiter.as_str()) {
            let scoped = row.enter_foreach(element)?;
            if let Some(entity) = self.child.build_from_row(&scoped)? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }
}
