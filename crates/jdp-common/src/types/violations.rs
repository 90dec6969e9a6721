//! Supervision violation entities
//!
//! Value types consumed by the violation response normalization manager.
//! All updates go through `with_*` structural-update constructors: callers
//! hand over ownership and get back new values, so normalization never
//! mutates entities the caller still holds.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::JdpError;

/// The category of a supervision violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationType {
    Felony,
    Misdemeanor,
    Law,
    Technical,
    Absconded,
    Escaped,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::Felony => "FELONY",
            ViolationType::Misdemeanor => "MISDEMEANOR",
            ViolationType::Law => "LAW",
            ViolationType::Technical => "TECHNICAL",
            ViolationType::Absconded => "ABSCONDED",
            ViolationType::Escaped => "ESCAPED",
        }
    }

    /// Every declared variant, in declaration order. Used to validate enum
    /// mappings in ingest manifests at configuration load time.
    pub const fn variants() -> &'static [&'static str] {
        &[
            "FELONY",
            "MISDEMEANOR",
            "LAW",
            "TECHNICAL",
            "ABSCONDED",
            "ESCAPED",
        ]
    }
}

impl std::fmt::Display for ViolationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ViolationType {
    type Err = JdpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FELONY" => Ok(ViolationType::Felony),
            "MISDEMEANOR" => Ok(ViolationType::Misdemeanor),
            "LAW" => Ok(ViolationType::Law),
            "TECHNICAL" => Ok(ViolationType::Technical),
            "ABSCONDED" => Ok(ViolationType::Absconded),
            "ESCAPED" => Ok(ViolationType::Escaped),
            _ => Err(JdpError::Parse(format!("Unknown violation type: {s}"))),
        }
    }
}

/// One categorized type attached to a violation, with the raw source text it
/// was parsed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationTypeEntry {
    pub violation_type: Option<ViolationType>,
    pub violation_type_raw_text: Option<String>,
}

impl ViolationTypeEntry {
    pub fn new(violation_type: ViolationType) -> Self {
        Self {
            violation_type: Some(violation_type),
            violation_type_raw_text: None,
        }
    }
}

/// One supervision condition recorded as violated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolatedConditionEntry {
    pub condition: String,
    pub condition_raw_text: Option<String>,
}

impl ViolatedConditionEntry {
    pub fn new(condition: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            condition_raw_text: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = condition.into();
        self
    }
}

/// A supervision violation, hydrated from ingest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub external_id: Option<String>,
    pub violation_date: Option<NaiveDate>,
    pub is_violent: Option<bool>,
    pub violation_types: Vec<ViolationTypeEntry>,
    pub violated_conditions: Vec<ViolatedConditionEntry>,
}

impl Violation {
    pub fn with_violation_types(mut self, violation_types: Vec<ViolationTypeEntry>) -> Self {
        self.violation_types = violation_types;
        self
    }

    pub fn with_violated_conditions(
        mut self,
        violated_conditions: Vec<ViolatedConditionEntry>,
    ) -> Self {
        self.violated_conditions = violated_conditions;
        self
    }
}

/// A decision-body response to a supervision violation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationResponse {
    pub external_id: Option<String>,
    pub response_date: Option<NaiveDate>,
    pub is_draft: bool,
    pub violation: Option<Violation>,
}

impl ViolationResponse {
    pub fn with_violation(mut self, violation: Option<Violation>) -> Self {
        self.violation = violation;
        self
    }
}
