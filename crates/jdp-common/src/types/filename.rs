//! Normalized direct ingest file names
//!
//! Every file landed in an ingest bucket is renamed to a normalized form
//! before any metadata is recorded for it:
//!
//! ```text
//! <state>_<utc upload datetime>_<file type>_<file tag>.<extension>
//! unprocessed_20210601T093000_raw_myTable.csv
//! unprocessed_20211015T113000_ingest_view_supervision_periods.csv
//! ```
//!
//! The upload datetime doubles as the upper bound of the datetimes contained
//! in the file, so the file name alone is enough to register raw file
//! metadata.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JdpError;

/// Tag prefix identifying reference / code tables. Files with these tags are
/// exempt from data freshness checks.
pub const CODE_TABLE_TAG_PREFIX: &str = "REFERENCE_";

const UPLOAD_DATETIME_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Whether a normalized file holds raw source data or an exported ingest
/// view result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectIngestFileType {
    Raw,
    IngestView,
}

impl DirectIngestFileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectIngestFileType::Raw => "raw",
            DirectIngestFileType::IngestView => "ingest_view",
        }
    }
}

impl std::fmt::Display for DirectIngestFileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The components of a normalized direct ingest file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectIngestFileParts {
    /// "unprocessed" or "processed" (files are renamed in place as they
    /// move through the bucket lifecycle)
    pub processed_state: String,
    pub utc_upload_datetime: DateTime<Utc>,
    pub file_type: DirectIngestFileType,
    pub file_tag: String,
    pub extension: String,
}

impl DirectIngestFileParts {
    /// Parses a normalized file name into its components.
    pub fn parse(file_name: &str) -> Result<Self, JdpError> {
        let invalid = || JdpError::InvalidFileName(file_name.to_string());

        let (stem, extension) = file_name.rsplit_once('.').ok_or_else(invalid)?;
        if extension.is_empty() {
            return Err(invalid());
        }

        let mut tokens = stem.splitn(3, '_');
        let processed_state = tokens.next().ok_or_else(invalid)?;
        if processed_state != "unprocessed" && processed_state != "processed" {
            return Err(invalid());
        }
        let timestamp = tokens.next().ok_or_else(invalid)?;
        let rest = tokens.next().ok_or_else(invalid)?;

        let utc_upload_datetime = NaiveDateTime::parse_from_str(timestamp, UPLOAD_DATETIME_FORMAT)
            .map_err(|_| invalid())?
            .and_utc();

        let (file_type, file_tag) = if let Some(tag) = rest.strip_prefix("ingest_view_") {
            (DirectIngestFileType::IngestView, tag)
        } else if let Some(tag) = rest.strip_prefix("raw_") {
            (DirectIngestFileType::Raw, tag)
        } else {
            return Err(invalid());
        };

        if file_tag.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            processed_state: processed_state.to_string(),
            utc_upload_datetime,
            file_type,
            file_tag: file_tag.to_string(),
            extension: extension.to_string(),
        })
    }

    /// True for reference / code table files, which are exempt from
    /// freshness checks.
    pub fn is_code_table(&self) -> bool {
        self.file_tag.starts_with(CODE_TABLE_TAG_PREFIX)
    }
}

/// Builds a normalized file name from its components. Inverse of
/// [`DirectIngestFileParts::parse`].
pub fn build_normalized_file_name(
    processed_state: &str,
    utc_upload_datetime: DateTime<Utc>,
    file_type: DirectIngestFileType,
    file_tag: &str,
    extension: &str,
) -> String {
    format!(
        "{}_{}_{}_{}.{}",
        processed_state,
        utc_upload_datetime.format(UPLOAD_DATETIME_FORMAT),
        file_type.as_str(),
        file_tag,
        extension
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_raw_file_name() {
        let parts =
            DirectIngestFileParts::parse("unprocessed_20210601T093000_raw_myTable.csv").unwrap();
        assert_eq!(parts.processed_state, "unprocessed");
        assert_eq!(
            parts.utc_upload_datetime,
            Utc.with_ymd_and_hms(2021, 6, 1, 9, 30, 0).unwrap()
        );
        assert_eq!(parts.file_type, DirectIngestFileType::Raw);
        assert_eq!(parts.file_tag, "myTable");
        assert_eq!(parts.extension, "csv");
        assert!(!parts.is_code_table());
    }

    #[test]
    fn test_parse_ingest_view_file_name_with_underscore_tag() {
        let parts = DirectIngestFileParts::parse(
            "unprocessed_20211015T113000_ingest_view_supervision_periods.csv",
        )
        .unwrap();
        assert_eq!(parts.file_type, DirectIngestFileType::IngestView);
        assert_eq!(parts.file_tag, "supervision_periods");
    }

    #[test]
    fn test_parse_code_table_tag() {
        let parts =
            DirectIngestFileParts::parse("processed_20210601T093000_raw_REFERENCE_charges.csv")
                .unwrap();
        assert!(parts.is_code_table());
    }

    #[test]
    fn test_parse_rejects_malformed_names() {
        for name in [
            "myTable.csv",
            "unprocessed_20210601T093000_myTable.csv",
            "unprocessed_2021-06-01_raw_myTable.csv",
            "unprocessed_20210601T093000_raw_myTable",
            "staged_20210601T093000_raw_myTable.csv",
            "unprocessed_20210601T093000_raw_.csv",
        ] {
            assert!(
                DirectIngestFileParts::parse(name).is_err(),
                "expected parse failure for {name}"
            );
        }
    }

    #[test]
    fn test_build_round_trip() {
        let dt = Utc.with_ymd_and_hms(2022, 3, 4, 5, 6, 7).unwrap();
        let name = build_normalized_file_name(
            "unprocessed",
            dt,
            DirectIngestFileType::IngestView,
            "court_cases",
            "csv",
        );
        assert_eq!(name, "unprocessed_20220304T050607_ingest_view_court_cases.csv");

        let parts = DirectIngestFileParts::parse(&name).unwrap();
        assert_eq!(parts.utc_upload_datetime, dt);
        assert_eq!(parts.file_tag, "court_cases");
    }
}
