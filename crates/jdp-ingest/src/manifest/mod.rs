//! Declarative ingest view manifest interpreter
//!
//! A manifest is a YAML document describing how one flat row of an ingest
//! view export becomes a tree of entities. The interpreter has two phases:
//! [`parse::parse_manifest_yaml`] compiles the YAML into a tree of
//! [`ManifestNode`]s once per manifest, then
//! [`EntityTreeManifest::build_from_row`] is evaluated per row with no
//! further YAML in sight.
//!
//! Rows are string-valued maps. An empty string and a missing column are not
//! the same thing: empty means "no value here", missing means the manifest
//! references a column the view does not produce, which is always an error.

mod entity;
mod enum_mapping;
mod nodes;
mod parse;

pub use entity::{Entity, FieldValue};
pub use enum_mapping::{EnumOverrides, EnumOverridesBuilder, EnumParseToken, EnumRegistry};
pub use nodes::{
    EntityFilter, EntityTreeManifest, EnumFieldManifest, ExpandableListItemManifest,
    ListItemManifest, ListRelationshipManifest, ManifestNode, Row, FOREACH_LOOP_VALUE_NAME,
};
pub use parse::{parse_manifest_yaml, EntitySchema, ManifestContext};

pub type ManifestResult<T> = std::result::Result<T, ManifestError>;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Manifest references column [{0}] which is not present in the row")]
    MissingColumn(String),

    #[error("$foreach loops may not be nested")]
    NestedForeach,

    #[error("$iter may only be referenced inside a $foreach loop")]
    LoopValueOutsideForeach,

    #[error("Unknown enum type [{0}]")]
    UnknownEnumType(String),

    #[error("Expected enum type [{expected}], found [{found}]")]
    EnumTypeMismatch { expected: String, found: String },

    #[error("Enum type [{enum_type}] has no variant [{variant}]")]
    UnknownEnumVariant { enum_type: String, variant: String },

    #[error("Raw text [{raw_text}] is neither mapped nor ignored for enum type [{enum_type}]")]
    UnmappedRawText { raw_text: String, enum_type: String },

    #[error("Invalid manifest: {0}")]
    Invalid(String),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ManifestError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}
