//! Metadata manager for raw extract files

use chrono::{DateTime, Utc};
use jdp_common::types::{
    DirectIngestFileParts, DirectIngestFileType, IngestInstance, StorageFilePath,
};
use sqlx::PgPool;
use tracing::debug;

use super::models::{RawFileMetadata, RawFileMetadataSummary};
use super::{MetadataError, MetadataResult};

/// Tracks discovery and processing of raw extract files for one region and
/// ingest instance.
///
/// Every mutating operation performs exactly one logical row insert or
/// update; exclusion between concurrent callers is delegated entirely to the
/// store's transactional guarantees and the partial unique index on
/// (region_code, normalized_file_name, raw_data_instance).
#[derive(Debug, Clone)]
pub struct RawFileMetadataManager {
    pool: PgPool,
    region_code: String,
    instance: IngestInstance,
}

#[derive(Debug, sqlx::FromRow)]
struct RawFileRecord {
    file_id: i64,
    region_code: String,
    file_tag: String,
    normalized_file_name: String,
    discovery_time: DateTime<Utc>,
    processed_time: Option<DateTime<Utc>>,
    datetimes_contained_upper_bound_inclusive: DateTime<Utc>,
    is_invalidated: bool,
    raw_data_instance: String,
}

impl TryFrom<RawFileRecord> for RawFileMetadata {
    type Error = MetadataError;

    fn try_from(record: RawFileRecord) -> MetadataResult<Self> {
        let raw_data_instance = record.raw_data_instance.parse::<IngestInstance>()?;
        Ok(RawFileMetadata {
            file_id: record.file_id,
            region_code: record.region_code,
            file_tag: record.file_tag,
            normalized_file_name: record.normalized_file_name,
            discovery_time: record.discovery_time,
            processed_time: record.processed_time,
            datetimes_contained_upper_bound_inclusive: record
                .datetimes_contained_upper_bound_inclusive,
            is_invalidated: record.is_invalidated,
            raw_data_instance,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SummaryRecord {
    file_tag: String,
    num_processed_files: Option<i64>,
    num_unprocessed_files: Option<i64>,
    latest_processed_time: Option<DateTime<Utc>>,
    latest_discovery_time: Option<DateTime<Utc>>,
    latest_processed_upper_bound: Option<DateTime<Utc>>,
}

impl RawFileMetadataManager {
    pub fn new(pool: PgPool, region_code: &str, instance: IngestInstance) -> Self {
        Self {
            pool,
            region_code: region_code.to_uppercase(),
            instance,
        }
    }

    pub fn region_code(&self) -> &str {
        &self.region_code
    }

    pub fn instance(&self) -> IngestInstance {
        self.instance
    }

    /// Returns metadata for the unique non-invalidated row matching this
    /// path. `NotFound` if discovery has never happened; `DataIntegrity` if
    /// more than one active row matches (should never occur while the
    /// uniqueness invariant holds).
    pub async fn get_raw_file_metadata(
        &self,
        path: &StorageFilePath,
    ) -> MetadataResult<RawFileMetadata> {
        let records = sqlx::query_as::<_, RawFileRecord>(
            r#"
            SELECT file_id, region_code, file_tag, normalized_file_name,
                   discovery_time, processed_time,
                   datetimes_contained_upper_bound_inclusive,
                   is_invalidated, raw_data_instance
            FROM direct_ingest_raw_file_metadata
            WHERE region_code = $1
              AND normalized_file_name = $2
              AND raw_data_instance = $3
              AND is_invalidated = FALSE
            "#,
        )
        .bind(&self.region_code)
        .bind(path.file_name())
        .bind(self.instance.as_str())
        .fetch_all(&self.pool)
        .await?;

        if records.len() > 1 {
            return Err(MetadataError::data_integrity(format!(
                "Unexpected number of metadata rows for path [{}]: [{}]",
                path.abs_path(),
                records.len()
            )));
        }
        match records.into_iter().next() {
            Some(record) => RawFileMetadata::try_from(record),
            None => Err(MetadataError::not_found("Raw file metadata", &path.abs_path())),
        }
    }

    /// True iff a non-invalidated row exists for this path. Never raises for
    /// files nobody has seen.
    pub async fn has_raw_file_been_discovered(
        &self,
        path: &StorageFilePath,
    ) -> MetadataResult<bool> {
        match self.get_raw_file_metadata(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// True iff the file has a non-invalidated row with `processed_time` set.
    pub async fn has_raw_file_been_processed(
        &self,
        path: &StorageFilePath,
    ) -> MetadataResult<bool> {
        match self.get_raw_file_metadata(path).await {
            Ok(metadata) => Ok(metadata.processed_time.is_some()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Records first discovery of a raw file. Idempotent: if a
    /// non-invalidated row already exists for this normalized file name, the
    /// call is a no-op and `discovery_time` is left untouched.
    ///
    /// The check-then-insert runs inside one transaction, and the insert is
    /// conflict-ignoring against the active-row unique index, so concurrent
    /// discovery events for the same file cannot create duplicate rows.
    #[tracing::instrument(skip(self), fields(region = %self.region_code))]
    pub async fn mark_raw_file_as_discovered(&self, path: &StorageFilePath) -> MetadataResult<()> {
        let parts = DirectIngestFileParts::parse(path.file_name())?;
        if parts.file_type != DirectIngestFileType::Raw {
            return Err(MetadataError::data_integrity(format!(
                "Expected a raw file path, got [{}] for [{}]",
                parts.file_type,
                path.abs_path()
            )));
        }

        let mut tx = self.pool.begin().await?;

        let existing: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT file_id
            FROM direct_ingest_raw_file_metadata
            WHERE region_code = $1
              AND normalized_file_name = $2
              AND raw_data_instance = $3
              AND is_invalidated = FALSE
            FOR UPDATE
            "#,
        )
        .bind(&self.region_code)
        .bind(path.file_name())
        .bind(self.instance.as_str())
        .fetch_all(&mut *tx)
        .await?;

        if existing.len() > 1 {
            return Err(MetadataError::data_integrity(format!(
                "Unexpected number of metadata rows for path [{}]: [{}]",
                path.abs_path(),
                existing.len()
            )));
        }
        if let Some(file_id) = existing.first() {
            debug!(file_id, file_name = path.file_name(), "Raw file already discovered");
            tx.commit().await?;
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO direct_ingest_raw_file_metadata
                (region_code, file_tag, normalized_file_name, discovery_time,
                 datetimes_contained_upper_bound_inclusive, is_invalidated,
                 raw_data_instance)
            VALUES ($1, $2, $3, $4, $5, FALSE, $6)
            ON CONFLICT (region_code, normalized_file_name, raw_data_instance)
                WHERE is_invalidated = FALSE
                DO NOTHING
            "#,
        )
        .bind(&self.region_code)
        .bind(&parts.file_tag)
        .bind(path.file_name())
        .bind(Utc::now())
        .bind(parts.utc_upload_datetime)
        .bind(self.instance.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(file_name = path.file_name(), tag = %parts.file_tag, "Marked raw file as discovered");
        Ok(())
    }

    /// Sets `processed_time` on the unique matching row. Processing is
    /// exactly-once per file: a second call is a `DataIntegrity` error, not
    /// a no-op.
    #[tracing::instrument(skip(self), fields(region = %self.region_code))]
    pub async fn mark_raw_file_as_processed(&self, path: &StorageFilePath) -> MetadataResult<()> {
        let metadata = self.get_raw_file_metadata(path).await?;
        if metadata.processed_time.is_some() {
            return Err(MetadataError::data_integrity(format!(
                "Raw file [{}] has already been marked processed",
                path.abs_path()
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE direct_ingest_raw_file_metadata
            SET processed_time = $1
            WHERE file_id = $2 AND processed_time IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(metadata.file_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(MetadataError::data_integrity(format!(
                "Raw file [{}] was marked processed concurrently",
                path.abs_path()
            )));
        }

        debug!(file_id = metadata.file_id, "Marked raw file as processed");
        Ok(())
    }

    /// All non-invalidated rows for a tag discovered strictly after the
    /// bound, or all rows for the tag if the bound is `None`. Ordering is
    /// unspecified; callers sort downstream.
    pub async fn get_metadata_for_raw_files_discovered_after_datetime(
        &self,
        file_tag: &str,
        discovery_time_lower_bound_exclusive: Option<DateTime<Utc>>,
    ) -> MetadataResult<Vec<RawFileMetadata>> {
        let base = r#"
            SELECT file_id, region_code, file_tag, normalized_file_name,
                   discovery_time, processed_time,
                   datetimes_contained_upper_bound_inclusive,
                   is_invalidated, raw_data_instance
            FROM direct_ingest_raw_file_metadata
            WHERE region_code = $1
              AND raw_data_instance = $2
              AND file_tag = $3
              AND is_invalidated = FALSE
        "#;

        let records = match discovery_time_lower_bound_exclusive {
            Some(bound) => {
                let sql = format!("{base} AND discovery_time > $4");
                sqlx::query_as::<_, RawFileRecord>(&sql)
                    .bind(&self.region_code)
                    .bind(self.instance.as_str())
                    .bind(file_tag)
                    .bind(bound)
                    .fetch_all(&self.pool)
                    .await?
            },
            None => {
                sqlx::query_as::<_, RawFileRecord>(base)
                    .bind(&self.region_code)
                    .bind(self.instance.as_str())
                    .bind(file_tag)
                    .fetch_all(&self.pool)
                    .await?
            },
        };

        records.into_iter().map(RawFileMetadata::try_from).collect()
    }

    /// Count of non-invalidated rows with no `processed_time` for this
    /// region and instance.
    pub async fn get_num_unprocessed_raw_files(&self) -> MetadataResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM direct_ingest_raw_file_metadata
            WHERE region_code = $1
              AND raw_data_instance = $2
              AND is_invalidated = FALSE
              AND processed_time IS NULL
            "#,
        )
        .bind(&self.region_code)
        .bind(self.instance.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Marks one row as superseded. Not reversible; the row stays behind for
    /// audit history and a corrected re-upload gets a fresh row.
    #[tracing::instrument(skip(self), fields(region = %self.region_code))]
    pub async fn mark_raw_file_as_invalidated(&self, file_id: i64) -> MetadataResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE direct_ingest_raw_file_metadata
            SET is_invalidated = TRUE
            WHERE file_id = $1 AND region_code = $2 AND raw_data_instance = $3
            "#,
        )
        .bind(file_id)
        .bind(&self.region_code)
        .bind(self.instance.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(MetadataError::not_found(
                "Raw file metadata",
                &format!("file_id={file_id}"),
            ));
        }
        Ok(())
    }

    /// Per-tag rollups for every active row in this region and instance.
    pub async fn get_raw_file_metadata_summaries(
        &self,
    ) -> MetadataResult<Vec<RawFileMetadataSummary>> {
        let records = sqlx::query_as::<_, SummaryRecord>(
            r#"
            SELECT file_tag,
                   COUNT(*) FILTER (WHERE processed_time IS NOT NULL) AS num_processed_files,
                   COUNT(*) FILTER (WHERE processed_time IS NULL) AS num_unprocessed_files,
                   MAX(processed_time) AS latest_processed_time,
                   MAX(discovery_time) AS latest_discovery_time,
                   MAX(datetimes_contained_upper_bound_inclusive)
                       FILTER (WHERE processed_time IS NOT NULL) AS latest_processed_upper_bound
            FROM direct_ingest_raw_file_metadata
            WHERE region_code = $1
              AND raw_data_instance = $2
              AND is_invalidated = FALSE
            GROUP BY file_tag
            ORDER BY file_tag
            "#,
        )
        .bind(&self.region_code)
        .bind(self.instance.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(records
            .into_iter()
            .map(|r| RawFileMetadataSummary {
                file_tag: r.file_tag,
                num_processed_files: r.num_processed_files.unwrap_or(0),
                num_unprocessed_files: r.num_unprocessed_files.unwrap_or(0),
                latest_processed_time: r.latest_processed_time,
                latest_discovery_time: r.latest_discovery_time,
                latest_processed_upper_bound: r.latest_processed_upper_bound,
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw_path(file_name: &str) -> StorageFilePath {
        StorageFilePath::new("us-xx-ingest", format!("us_xx/{file_name}"))
    }

    fn manager(pool: PgPool) -> RawFileMetadataManager {
        RawFileMetadataManager::new(pool, "us_xx", IngestInstance::Primary)
    }

    #[sqlx::test]
    async fn test_discovery_is_idempotent(pool: PgPool) -> MetadataResult<()> {
        let manager = manager(pool);
        let path = raw_path("unprocessed_20210601T093000_raw_myTable.csv");

        assert!(!manager.has_raw_file_been_discovered(&path).await?);

        manager.mark_raw_file_as_discovered(&path).await?;
        let first = manager.get_raw_file_metadata(&path).await?;

        // Repeated discovery (e.g. a retried storage notification) is a
        // no-op and must not reset discovery_time.
        manager.mark_raw_file_as_discovered(&path).await?;
        let second = manager.get_raw_file_metadata(&path).await?;

        assert_eq!(first.file_id, second.file_id);
        assert_eq!(first.discovery_time, second.discovery_time);
        assert!(manager.has_raw_file_been_discovered(&path).await?);
        assert_eq!(manager.get_num_unprocessed_raw_files().await?, 1);
        Ok(())
    }

    #[sqlx::test]
    async fn test_discovery_populates_parts_from_file_name(pool: PgPool) -> MetadataResult<()> {
        let manager = manager(pool);
        let path = raw_path("unprocessed_20210601T093000_raw_myTable.csv");

        manager.mark_raw_file_as_discovered(&path).await?;
        let metadata = manager.get_raw_file_metadata(&path).await?;

        assert_eq!(metadata.region_code, "US_XX");
        assert_eq!(metadata.file_tag, "myTable");
        assert_eq!(metadata.raw_data_instance, IngestInstance::Primary);
        assert_eq!(
            metadata.datetimes_contained_upper_bound_inclusive,
            Utc.with_ymd_and_hms(2021, 6, 1, 9, 30, 0).unwrap()
        );
        assert!(metadata.processed_time.is_none());
        assert!(!metadata.is_code_table());
        Ok(())
    }

    #[sqlx::test]
    async fn test_discovery_rejects_ingest_view_paths(pool: PgPool) {
        let manager = manager(pool);
        let path = raw_path("unprocessed_20210601T093000_ingest_view_myView.csv");

        let result = manager.mark_raw_file_as_discovered(&path).await;
        assert!(matches!(result, Err(MetadataError::DataIntegrity(_))));
    }

    #[sqlx::test]
    async fn test_processing_is_exactly_once(pool: PgPool) -> MetadataResult<()> {
        let manager = manager(pool);
        let path = raw_path("unprocessed_20210601T093000_raw_myTable.csv");

        manager.mark_raw_file_as_discovered(&path).await?;
        assert!(!manager.has_raw_file_been_processed(&path).await?);

        manager.mark_raw_file_as_processed(&path).await?;
        assert!(manager.has_raw_file_been_processed(&path).await?);
        assert_eq!(manager.get_num_unprocessed_raw_files().await?, 0);

        let result = manager.mark_raw_file_as_processed(&path).await;
        assert!(matches!(result, Err(MetadataError::DataIntegrity(_))));
        Ok(())
    }

    #[sqlx::test]
    async fn test_mark_processed_requires_discovery(pool: PgPool) {
        let manager = manager(pool);
        let path = raw_path("unprocessed_20210601T093000_raw_myTable.csv");

        let result = manager.mark_raw_file_as_processed(&path).await;
        assert!(matches!(result, Err(MetadataError::NotFound(_))));
    }

    #[sqlx::test]
    async fn test_instances_do_not_share_rows(pool: PgPool) -> MetadataResult<()> {
        let primary = RawFileMetadataManager::new(pool.clone(), "us_xx", IngestInstance::Primary);
        let secondary = RawFileMetadataManager::new(pool, "us_xx", IngestInstance::Secondary);
        let path = raw_path("unprocessed_20210601T093000_raw_myTable.csv");

        primary.mark_raw_file_as_discovered(&path).await?;
        assert!(!secondary.has_raw_file_been_discovered(&path).await?);

        secondary.mark_raw_file_as_discovered(&path).await?;
        let primary_row = primary.get_raw_file_metadata(&path).await?;
        let secondary_row = secondary.get_raw_file_metadata(&path).await?;
        assert_ne!(primary_row.file_id, secondary_row.file_id);
        Ok(())
    }

    #[sqlx::test]
    async fn test_discovered_after_datetime_bound_is_exclusive(pool: PgPool) -> MetadataResult<()> {
        let manager = manager(pool);
        let first = raw_path("unprocessed_20210601T093000_raw_myTable.csv");
        let second = raw_path("unprocessed_20210602T093000_raw_myTable.csv");
        let other_tag = raw_path("unprocessed_20210603T093000_raw_otherTable.csv");

        manager.mark_raw_file_as_discovered(&first).await?;
        manager.mark_raw_file_as_discovered(&second).await?;
        manager.mark_raw_file_as_discovered(&other_tag).await?;

        let all = manager
            .get_metadata_for_raw_files_discovered_after_datetime("myTable", None)
            .await?;
        assert_eq!(all.len(), 2);

        let first_discovery = manager.get_raw_file_metadata(&first).await?.discovery_time;
        let after_first = manager
            .get_metadata_for_raw_files_discovered_after_datetime("myTable", Some(first_discovery))
            .await?;
        // Strictly-greater bound excludes the row discovered at the bound.
        assert!(after_first
            .iter()
            .all(|m| m.discovery_time > first_discovery));
        assert!(after_first.len() < all.len());
        Ok(())
    }

    #[sqlx::test]
    async fn test_invalidation_allows_rediscovery(pool: PgPool) -> MetadataResult<()> {
        let manager = manager(pool);
        let path = raw_path("unprocessed_20210601T093000_raw_myTable.csv");

        manager.mark_raw_file_as_discovered(&path).await?;
        let original = manager.get_raw_file_metadata(&path).await?;

        manager.mark_raw_file_as_invalidated(original.file_id).await?;
        assert!(!manager.has_raw_file_been_discovered(&path).await?);

        manager.mark_raw_file_as_discovered(&path).await?;
        let replacement = manager.get_raw_file_metadata(&path).await?;
        assert_ne!(original.file_id, replacement.file_id);
        assert!(!replacement.is_invalidated);
        Ok(())
    }

    #[sqlx::test]
    async fn test_summaries_group_by_tag(pool: PgPool) -> MetadataResult<()> {
        let manager = manager(pool);
        let a1 = raw_path("unprocessed_20210601T093000_raw_tagA.csv");
        let a2 = raw_path("unprocessed_20210602T093000_raw_tagA.csv");
        let b1 = raw_path("unprocessed_20210603T093000_raw_tagB.csv");

        manager.mark_raw_file_as_discovered(&a1).await?;
        manager.mark_raw_file_as_discovered(&a2).await?;
        manager.mark_raw_file_as_discovered(&b1).await?;
        manager.mark_raw_file_as_processed(&a1).await?;

        let summaries = manager.get_raw_file_metadata_summaries().await?;
        assert_eq!(summaries.len(), 2);

        let tag_a = summaries.iter().find(|s| s.file_tag == "tagA").unwrap();
        assert_eq!(tag_a.num_processed_files, 1);
        assert_eq!(tag_a.num_unprocessed_files, 1);
        assert_eq!(
            tag_a.latest_processed_upper_bound,
            Some(Utc.with_ymd_and_hms(2021, 6, 1, 9, 30, 0).unwrap())
        );

        let tag_b = summaries.iter().find(|s| s.file_tag == "tagB").unwrap();
        assert_eq!(tag_b.num_processed_files, 0);
        assert_eq!(tag_b.num_unprocessed_files, 1);
        assert!(tag_b.latest_processed_time.is_none());
        Ok(())
    }
}
