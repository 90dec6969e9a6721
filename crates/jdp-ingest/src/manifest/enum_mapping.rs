//! Enum types, raw-text mappings, and ignores
//!
//! Manifests map free-form source strings onto closed enum vocabularies.
//! Mappings are strict: raw text that is neither mapped nor ignored fails
//! the row rather than silently passing through.

use std::collections::{BTreeMap, BTreeSet};

use jdp_common::types::ViolationType;

use crate::manifest::{ManifestError, ManifestResult};

/// The closed set of enum types a manifest may reference, with their
/// variants. Parse-time validation of `EnumType.VARIANT` keys happens
/// against this registry.
#[derive(Debug, Clone, Default)]
pub struct EnumRegistry {
    types: BTreeMap<String, Vec<String>>,
}

impl EnumRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry used by the ingest pipeline.
    pub fn standard() -> Self {
        Self::new()
            .with_type("ViolationType", ViolationType::variants().iter().copied())
            .with_type(
                "ViolatedConditionType",
                [
                    "EMPLOYMENT",
                    "FAILURE_TO_NOTIFY",
                    "FAILURE_TO_REPORT",
                    "FINANCIAL",
                    "LAW",
                    "SPECIAL_CONDITIONS",
                    "SUBSTANCE",
                ],
            )
    }

    pub fn with_type<I, S>(mut self, name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types
            .insert(name.into(), variants.into_iter().map(Into::into).collect());
        self
    }

    pub fn contains_type(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Errors if the type is unknown or the variant is not in the type.
    pub fn validate_variant(&self, enum_type: &str, variant: &str) -> ManifestResult<()> {
        let variants = self
            .types
            .get(enum_type)
            .ok_or_else(|| ManifestError::UnknownEnumType(enum_type.to_string()))?;
        if variants.iter().any(|v| v == variant) {
            Ok(())
        } else {
            Err(ManifestError::UnknownEnumVariant {
                enum_type: enum_type.to_string(),
                variant: variant.to_string(),
            })
        }
    }
}

/// Raw-text mappings and ignores for one enum field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnumOverrides {
    mappings: BTreeMap<String, String>,
    ignores: BTreeSet<String>,
}

impl EnumOverrides {
    pub fn builder() -> EnumOverridesBuilder {
        EnumOverridesBuilder::default()
    }

    pub fn variant_for(&self, raw_text: &str) -> Option<&str> {
        self.mappings.get(raw_text).map(String::as_str)
    }

    pub fn is_ignored(&self, raw_text: &str) -> bool {
        self.ignores.contains(raw_text)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnumOverridesBuilder {
    mappings: BTreeMap<String, String>,
    ignores: BTreeSet<String>,
}

impl EnumOverridesBuilder {
    pub fn map(mut self, raw_text: impl Into<String>, variant: impl Into<String>) -> Self {
        self.mappings.insert(raw_text.into(), variant.into());
        self
    }

    pub fn ignore(mut self, raw_text: impl Into<String>) -> Self {
        self.ignores.insert(raw_text.into());
        self
    }

    pub fn build(self) -> EnumOverrides {
        EnumOverrides {
            mappings: self.mappings,
            ignores: self.ignores,
        }
    }
}

/// The evaluated value of an enum field for one row: the raw text plus
/// enough context to resolve it to a variant on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumParseToken {
    pub raw_text: Option<String>,
    pub enum_type: String,
    pub overrides: EnumOverrides,
}

impl EnumParseToken {
    /// Resolves the token to an enum variant name. `None` when there was no
    /// raw text or the raw text is explicitly ignored; an error when the raw
    /// text exists but has no mapping.
    pub fn parse(&self) -> ManifestResult<Option<String>> {
        let raw_text = match &self.raw_text {
            None => return Ok(None),
            Some(raw_text) => raw_text,
        };
        if self.overrides.is_ignored(raw_text) {
            return Ok(None);
        }
        match self.overrides.variant_for(raw_text) {
            Some(variant) => Ok(Some(variant.to_string())),
            None => Err(ManifestError::UnmappedRawText {
                raw_text: raw_text.clone(),
                enum_type: self.enum_type.clone(),
            }),
        }
    }
}
