//! Direct ingest instance identifiers

use serde::{Deserialize, Serialize};

use crate::error::JdpError;

/// One of the two parallel ingest environments per region.
///
/// SECONDARY is used to stage a full rerun of a region's ingest without
/// disturbing the live PRIMARY dataset. Every metadata row is owned by
/// exactly one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IngestInstance {
    Primary,
    Secondary,
}

impl IngestInstance {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestInstance::Primary => "PRIMARY",
            IngestInstance::Secondary => "SECONDARY",
        }
    }
}

impl std::fmt::Display for IngestInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for IngestInstance {
    type Err = JdpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PRIMARY" => Ok(IngestInstance::Primary),
            "SECONDARY" => Ok(IngestInstance::Secondary),
            _ => Err(JdpError::InvalidInstance(s.to_string())),
        }
    }
}
