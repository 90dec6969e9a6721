//! Metadata row models

use chrono::{DateTime, Utc};
use jdp_common::types::{IngestInstance, CODE_TABLE_TAG_PREFIX};
use serde::{Deserialize, Serialize};

/// One raw extract file discovered in cloud storage for one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFileMetadata {
    /// Surrogate key, minted at discovery
    pub file_id: i64,
    pub region_code: String,
    /// Logical source table this file is an export of
    pub file_tag: String,
    pub normalized_file_name: String,
    /// Set once, at first discovery; repeated discovery events never reset it
    pub discovery_time: DateTime<Utc>,
    /// Set exactly once, when raw import to the warehouse completes
    pub processed_time: Option<DateTime<Utc>>,
    /// Upper bound of source datetimes in the file, derived from its name
    pub datetimes_contained_upper_bound_inclusive: DateTime<Utc>,
    pub is_invalidated: bool,
    pub raw_data_instance: IngestInstance,
}

impl RawFileMetadata {
    /// Reference/code table files are exempt from freshness checks. Derived,
    /// not stored.
    pub fn is_code_table(&self) -> bool {
        self.file_tag.starts_with(CODE_TABLE_TAG_PREFIX)
    }
}

/// Per-tag rollup of a region's raw file metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFileMetadataSummary {
    pub file_tag: String,
    pub num_processed_files: i64,
    pub num_unprocessed_files: i64,
    pub latest_processed_time: Option<DateTime<Utc>>,
    pub latest_discovery_time: Option<DateTime<Utc>>,
    pub latest_processed_upper_bound: Option<DateTime<Utc>>,
}

/// One generated ingest view export (the result of running one ingest view's
/// query over raw data for a region/time window).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestViewFileMetadata {
    pub file_id: i64,
    pub region_code: String,
    pub instance: IngestInstance,
    pub ingest_view_name: String,
    pub upper_bound_datetime_inclusive: DateTime<Utc>,
    /// None means "from the beginning of time"
    pub lower_bound_datetime_exclusive: Option<DateTime<Utc>>,
    pub job_creation_time: DateTime<Utc>,
    /// Registered BEFORE the file is physically written, so a storage
    /// watcher can never see a file whose metadata row has no name
    pub normalized_file_name: Option<String>,
    pub export_time: Option<DateTime<Utc>>,
    pub processed_time: Option<DateTime<Utc>>,
    pub is_invalidated: bool,
    /// True for rows produced by splitting an oversized export into chunks
    pub is_file_split: bool,
}

impl IngestViewFileMetadata {
    /// The row's position in the export job lifecycle, derived from which
    /// timestamps are populated.
    pub fn state(&self) -> IngestViewFileState {
        if self.is_invalidated {
            IngestViewFileState::Invalidated
        } else if self.processed_time.is_some() {
            IngestViewFileState::Processed
        } else if self.export_time.is_some() {
            IngestViewFileState::Exported
        } else if self.normalized_file_name.is_some() {
            IngestViewFileState::NameRegistered
        } else {
            IngestViewFileState::Created
        }
    }
}

/// Lifecycle states of an ingest view export job, in order. INVALIDATED is
/// reachable from any state and is not reversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestViewFileState {
    Created,
    NameRegistered,
    Exported,
    Processed,
    Invalidated,
}

/// Identifies one ingest view export window. Two active jobs may never share
/// the same args.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestViewExportArgs {
    pub ingest_view_name: String,
    pub upper_bound_datetime_inclusive: DateTime<Utc>,
    pub lower_bound_datetime_exclusive: Option<DateTime<Utc>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn view_metadata() -> IngestViewFileMetadata {
        IngestViewFileMetadata {
            file_id: 1,
            region_code: "US_XX".to_string(),
            instance: IngestInstance::Primary,
            ingest_view_name: "supervision_periods".to_string(),
            upper_bound_datetime_inclusive: Utc.with_ymd_and_hms(2021, 7, 1, 0, 0, 0).unwrap(),
            lower_bound_datetime_exclusive: None,
            job_creation_time: Utc.with_ymd_and_hms(2021, 7, 1, 1, 0, 0).unwrap(),
            normalized_file_name: None,
            export_time: None,
            processed_time: None,
            is_invalidated: false,
            is_file_split: false,
        }
    }

    #[test]
    fn test_state_derivation_follows_lifecycle() {
        let mut metadata = view_metadata();
        assert_eq!(metadata.state(), IngestViewFileState::Created);

        metadata.normalized_file_name =
            Some("unprocessed_20210701T010000_ingest_view_supervision_periods.csv".to_string());
        assert_eq!(metadata.state(), IngestViewFileState::NameRegistered);

        metadata.export_time = Some(Utc.with_ymd_and_hms(2021, 7, 1, 2, 0, 0).unwrap());
        assert_eq!(metadata.state(), IngestViewFileState::Exported);

        metadata.processed_time = Some(Utc.with_ymd_and_hms(2021, 7, 1, 3, 0, 0).unwrap());
        assert_eq!(metadata.state(), IngestViewFileState::Processed);

        metadata.is_invalidated = true;
        assert_eq!(metadata.state(), IngestViewFileState::Invalidated);
    }

    #[test]
    fn test_is_code_table_is_a_tag_prefix_test() {
        let metadata = RawFileMetadata {
            file_id: 1,
            region_code: "US_XX".to_string(),
            file_tag: "REFERENCE_charge_classes".to_string(),
            normalized_file_name: "unprocessed_20210601T093000_raw_REFERENCE_charge_classes.csv"
                .to_string(),
            discovery_time: Utc.with_ymd_and_hms(2021, 6, 1, 9, 30, 0).unwrap(),
            processed_time: None,
            datetimes_contained_upper_bound_inclusive: Utc
                .with_ymd_and_hms(2021, 6, 1, 9, 30, 0)
                .unwrap(),
            is_invalidated: false,
            raw_data_instance: IngestInstance::Primary,
        };
        assert!(metadata.is_code_table());
    }
}
