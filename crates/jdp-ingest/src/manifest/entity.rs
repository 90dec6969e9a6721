//! Built entity trees
//!
//! The output of evaluating a manifest against one row. Entities are
//! schema-free at this layer; the parse phase has already validated field
//! names and enum variants against the registered entity schemas, so a built
//! tree can be handed straight to a persistence layer.

use std::collections::BTreeMap;

use crate::manifest::enum_mapping::EnumParseToken;

/// A single built field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    /// An enum field carries its raw text and mapping so callers can decide
    /// when to resolve it.
    Enum(EnumParseToken),
    Entity(Box<Entity>),
    EntityList(Vec<Entity>),
}

/// One node in a built entity tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub entity_type: String,
    /// Fields with a built value. A field that evaluated to nothing is
    /// absent, not present-with-null.
    pub fields: BTreeMap<String, FieldValue>,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn string_field(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(FieldValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn enum_field(&self, name: &str) -> Option<&EnumParseToken> {
        match self.fields.get(name) {
            Some(FieldValue::Enum(token)) => Some(token),
            _ => None,
        }
    }

    /// Child entities under a field, whether single or list valued.
    pub fn child_entities(&self, name: &str) -> Vec<&Entity> {
        match self.fields.get(name) {
            Some(FieldValue::Entity(child)) => vec![child.as_ref()],
            Some(FieldValue::EntityList(children)) => children.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// All enum-valued fields on this entity, in field name order.
    pub fn enum_fields(&self) -> impl Iterator<Item = (&str, &EnumParseToken)> {
        self.fields.iter().filter_map(|(name, value)| match value {
            FieldValue::Enum(token) => Some((name.as_str(), token)),
            _ => None,
        })
    }
}
