//! Metadata manager for materialized ingest view exports

use chrono::{DateTime, Utc};
use jdp_common::types::{IngestInstance, StorageFilePath};
use sqlx::PgPool;
use tracing::debug;

use super::models::{IngestViewExportArgs, IngestViewFileMetadata};
use super::{MetadataError, MetadataResult};

const UNIQUE_VIOLATION: &str = "23505";

/// Tracks the lifecycle of ingest view export jobs for one region and ingest
/// instance: created, name registered, exported, processed, with
/// invalidation reachable from any state.
///
/// Rows are created at job registration time, before any file exists in
/// storage, so that a crash between registration and export leaves a
/// restartable record rather than an orphan file.
#[derive(Debug, Clone)]
pub struct IngestViewFileMetadataManager {
    pool: PgPool,
    region_code: String,
    instance: IngestInstance,
}

#[derive(Debug, sqlx::FromRow)]
struct IngestViewFileRecord {
    file_id: i64,
    region_code: String,
    instance: String,
    ingest_view_name: String,
    upper_bound_datetime_inclusive: DateTime<Utc>,
    lower_bound_datetime_exclusive: Option<DateTime<Utc>>,
    job_creation_time: DateTime<Utc>,
    normalized_file_name: Option<String>,
    export_time: Option<DateTime<Utc>>,
    processed_time: Option<DateTime<Utc>>,
    is_invalidated: bool,
    is_file_split: bool,
}

impl TryFrom<IngestViewFileRecord> for IngestViewFileMetadata {
    type Error = MetadataError;

    fn try_from(record: IngestViewFileRecord) -> MetadataResult<Self> {
        let instance = record.instance.parse::<IngestInstance>()?;
        Ok(IngestViewFileMetadata {
            file_id: record.file_id,
            region_code: record.region_code,
            instance,
            ingest_view_name: record.ingest_view_name,
            upper_bound_datetime_inclusive: record.upper_bound_datetime_inclusive,
            lower_bound_datetime_exclusive: record.lower_bound_datetime_exclusive,
            job_creation_time: record.job_creation_time,
            normalized_file_name: record.normalized_file_name,
            export_time: record.export_time,
            processed_time: record.processed_time,
            is_invalidated: record.is_invalidated,
            is_file_split: record.is_file_split,
        })
    }
}

const RETURNING_COLUMNS: &str = "file_id, region_code, instance, ingest_view_name, \
     upper_bound_datetime_inclusive, lower_bound_datetime_exclusive, \
     job_creation_time, normalized_file_name, export_time, \
     processed_time, is_invalidated, is_file_split";

const SELECT_COLUMNS: &str = r#"
    SELECT file_id, region_code, instance, ingest_view_name,
           upper_bound_datetime_inclusive, lower_bound_datetime_exclusive,
           job_creation_time, normalized_file_name, export_time,
           processed_time, is_invalidated, is_file_split
    FROM direct_ingest_view_file_metadata
"#;

impl IngestViewFileMetadataManager {
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

    /// Registers a new export job for a view over a time window. Rejects a
    /// window whose bounds are out of order, and rejects registration when a
    /// non-invalidated non-split row already covers the identical window for
    /// this view.
    #[tracing::instrument(skip(self), fields(region = %self.region_code))]
    pub async fn register_ingest_view_export_job(
        &self,
        args: &IngestViewExportArgs,
    ) -> MetadataResult<IngestViewFileMetadata> {
        if let Some(lower) = args.lower_bound_datetime_exclusive {
            if lower >= args.upper_bound_datetime_inclusive {
                return Err(MetadataError::data_integrity(format!(
                    "Export window for view [{}] has lower bound [{}] not before upper bound [{}]",
                    args.ingest_view_name, lower, args.upper_bound_datetime_inclusive
                )));
            }
        }

        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT file_id
            FROM direct_ingest_view_file_metadata
            WHERE region_code = $1
              AND instance = $2
              AND ingest_view_name = $3
              AND upper_bound_datetime_inclusive = $4
              AND lower_bound_datetime_exclusive IS NOT DISTINCT FROM $5
              AND is_invalidated = FALSE
              AND is_file_split = FALSE
            "#,
        )
        .bind(&self.region_code)
        .bind(self.instance.as_str())
        .bind(&args.ingest_view_name)
        .bind(args.upper_bound_datetime_inclusive)
        .bind(args.lower_bound_datetime_exclusive)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(file_id) = existing {
            return Err(MetadataError::data_integrity(format!(
                "Export job for view [{}] over this window already registered as file_id [{}]",
                args.ingest_view_name, file_id
            )));
        }

        let sql = format!(
            r#"
            INSERT INTO direct_ingest_view_file_metadata
                (region_code, instance, ingest_view_name,
                 upper_bound_datetime_inclusive, lower_bound_datetime_exclusive,
                 job_creation_time, is_invalidated, is_file_split)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, FALSE)
            RETURNING {RETURNING_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, IngestViewFileRecord>(&sql)
            .bind(&self.region_code)
            .bind(self.instance.as_str())
            .bind(&args.ingest_view_name)
            .bind(args.upper_bound_datetime_inclusive)
            .bind(args.lower_bound_datetime_exclusive)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                    MetadataError::data_integrity(format!(
                        "Export job for view [{}] over this window registered concurrently",
                        args.ingest_view_name
                    ))
                },
                _ => MetadataError::Sqlx(e),
            })?;

        tx.commit().await?;

        debug!(
            file_id = record.file_id,
            view = %args.ingest_view_name,
            "Registered ingest view export job"
        );
        IngestViewFileMetadata::try_from(record)
    }

    /// Looks up the non-invalidated non-split row for exactly these export
    /// args. `NotFound` if no such job was ever registered.
    pub async fn get_ingest_view_metadata_for_export_job(
        &self,
        args: &IngestViewExportArgs,
    ) -> MetadataResult<IngestViewFileMetadata> {
        let sql = format!(
            r#"{SELECT_COLUMNS}
            WHERE region_code = $1
              AND instance = $2
              AND ingest_view_name = $3
              AND upper_bound_datetime_inclusive = $4
              AND lower_bound_datetime_exclusive IS NOT DISTINCT FROM $5
              AND is_invalidated = FALSE
              AND is_file_split = FALSE
            "#
        );
        let record = sqlx::query_as::<_, IngestViewFileRecord>(&sql)
            .bind(&self.region_code)
            .bind(self.instance.as_str())
            .bind(&args.ingest_view_name)
            .bind(args.upper_bound_datetime_inclusive)
            .bind(args.lower_bound_datetime_exclusive)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                MetadataError::not_found(
                    "Ingest view export job",
                    &format!(
                        "{} upper={}",
                        args.ingest_view_name, args.upper_bound_datetime_inclusive
                    ),
                )
            })?;

        IngestViewFileMetadata::try_from(record)
    }

    /// Records the file name the export will be written under. Must happen
    /// before the physical export, and exactly once per row.
    #[tracing::instrument(skip(self, metadata), fields(region = %self.region_code, file_id = metadata.file_id))]
    pub async fn register_ingest_view_export_file_name(
        &self,
        metadata: &IngestViewFileMetadata,
        path: &StorageFilePath,
    ) -> MetadataResult<()> {
        let current = self.get_metadata_by_file_id(metadata.file_id).await?;
        if let Some(existing) = &current.normalized_file_name {
            return Err(MetadataError::data_integrity(format!(
                "Export job [{}] already has file name [{}] registered",
                metadata.file_id, existing
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE direct_ingest_view_file_metadata
            SET normalized_file_name = $1
            WHERE file_id = $2 AND normalized_file_name IS NULL
            "#,
        )
        .bind(path.file_name())
        .bind(metadata.file_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(MetadataError::data_integrity(format!(
                "File name for export job [{}] was registered concurrently",
                metadata.file_id
            )));
        }

        debug!(file_name = path.file_name(), "Registered ingest view export file name");
        Ok(())
    }

    /// Records that the export file has been written to storage. Requires a
    /// registered file name and no prior export.
    #[tracing::instrument(skip(self, metadata), fields(region = %self.region_code, file_id = metadata.file_id))]
    pub async fn mark_ingest_view_exported(
        &self,
        metadata: &IngestViewFileMetadata,
    ) -> MetadataResult<()> {
        let current = self.get_metadata_by_file_id(metadata.file_id).await?;
        if current.normalized_file_name.is_none() {
            return Err(MetadataError::data_integrity(format!(
                "Export job [{}] cannot be marked exported before a file name is registered",
                metadata.file_id
            )));
        }
        if current.export_time.is_some() {
            return Err(MetadataError::data_integrity(format!(
                "Export job [{}] has already been marked exported",
                metadata.file_id
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE direct_ingest_view_file_metadata
            SET export_time = $1
            WHERE file_id = $2 AND export_time IS NULL AND normalized_file_name IS NOT NULL
            "#,
        )
        .bind(Utc::now())
        .bind(metadata.file_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(MetadataError::data_integrity(format!(
                "Export job [{}] was marked exported concurrently",
                metadata.file_id
            )));
        }
        Ok(())
    }

    /// Records that the file's contents have been fully ingested. Requires
    /// that the file was exported first.
    #[tracing::instrument(skip(self), fields(region = %self.region_code))]
    pub async fn mark_ingest_view_file_as_processed(
        &self,
        path: &StorageFilePath,
    ) -> MetadataResult<()> {
        let current = self.get_metadata_for_file_name(path.file_name()).await?;
        if current.export_time.is_none() {
            return Err(MetadataError::data_integrity(format!(
                "Ingest view file [{}] cannot be marked processed before export",
                path.abs_path()
            )));
        }
        if current.processed_time.is_some() {
            return Err(MetadataError::data_integrity(format!(
                "Ingest view file [{}] has already been marked processed",
                path.abs_path()
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE direct_ingest_view_file_metadata
            SET processed_time = $1
            WHERE file_id = $2 AND processed_time IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(current.file_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(MetadataError::data_integrity(format!(
                "Ingest view file [{}] was marked processed concurrently",
                path.abs_path()
            )));
        }
        Ok(())
    }

    /// The most recently registered valid (non-invalidated, non-split) job
    /// for a view, or `None` if the view has never had one. Drives upper
    /// bound chaining when registering the next window.
    pub async fn get_ingest_view_metadata_for_most_recent_valid_job(
        &self,
        ingest_view_name: &str,
    ) -> MetadataResult<Option<IngestViewFileMetadata>> {
        let sql = format!(
            r#"{SELECT_COLUMNS}
            WHERE region_code = $1
              AND instance = $2
              AND ingest_view_name = $3
              AND is_invalidated = FALSE
              AND is_file_split = FALSE
            ORDER BY job_creation_time DESC, file_id DESC
            LIMIT 1
            "#
        );
        sqlx::query_as::<_, IngestViewFileRecord>(&sql)
            .bind(&self.region_code)
            .bind(self.instance.as_str())
            .bind(ingest_view_name)
            .fetch_optional(&self.pool)
            .await?
            .map(IngestViewFileMetadata::try_from)
            .transpose()
    }

    /// All non-invalidated rows that have not yet been exported, oldest
    /// registration first. Crash recovery walks this list.
    pub async fn get_ingest_view_metadata_pending_export(
        &self,
    ) -> MetadataResult<Vec<IngestViewFileMetadata>> {
        let sql = format!(
            r#"{SELECT_COLUMNS}
            WHERE region_code = $1
              AND instance = $2
              AND export_time IS NULL
              AND is_invalidated = FALSE
            ORDER BY job_creation_time, file_id
            "#
        );
        let records = sqlx::query_as::<_, IngestViewFileRecord>(&sql)
            .bind(&self.region_code)
            .bind(self.instance.as_str())
            .fetch_all(&self.pool)
            .await?;

        records.into_iter().map(IngestViewFileMetadata::try_from).collect()
    }

    /// Registers one chunk produced by splitting an oversized export. The
    /// chunk gets its own row, already named and exported; the original row
    /// is left untouched.
    #[tracing::instrument(skip(self, original), fields(region = %self.region_code, original_file_id = original.file_id))]
    pub async fn register_ingest_view_file_split(
        &self,
        original: &IngestViewFileMetadata,
        path: &StorageFilePath,
    ) -> MetadataResult<IngestViewFileMetadata> {
        let now = Utc::now();
        let sql = format!(
            r#"
            INSERT INTO direct_ingest_view_file_metadata
                (region_code, instance, ingest_view_name,
                 upper_bound_datetime_inclusive, lower_bound_datetime_exclusive,
                 job_creation_time, normalized_file_name, export_time,
                 is_invalidated, is_file_split)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, TRUE)
            RETURNING {RETURNING_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, IngestViewFileRecord>(&sql)
            .bind(&self.region_code)
            .bind(self.instance.as_str())
            .bind(&original.ingest_view_name)
            .bind(original.upper_bound_datetime_inclusive)
            .bind(original.lower_bound_datetime_exclusive)
            .bind(now)
            .bind(path.file_name())
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        debug!(
            file_id = record.file_id,
            file_name = path.file_name(),
            "Registered ingest view file split"
        );
        IngestViewFileMetadata::try_from(record)
    }

    /// Count of non-invalidated exported rows not yet processed.
    pub async fn get_num_unprocessed_ingest_view_files(&self) -> MetadataResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM direct_ingest_view_file_metadata
            WHERE region_code = $1
              AND instance = $2
              AND is_invalidated = FALSE
              AND export_time IS NOT NULL
              AND processed_time IS NULL
            "#,
        )
        .bind(&self.region_code)
        .bind(self.instance.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Registration time of the oldest unprocessed exported row, used as a
    /// backlog staleness signal.
    pub async fn get_date_of_earliest_unprocessed_ingest_view_file(
        &self,
    ) -> MetadataResult<Option<DateTime<Utc>>> {
        let earliest: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT MIN(job_creation_time)
            FROM direct_ingest_view_file_metadata
            WHERE region_code = $1
              AND instance = $2
              AND is_invalidated = FALSE
              AND export_time IS NOT NULL
              AND processed_time IS NULL
            "#,
        )
        .bind(&self.region_code)
        .bind(self.instance.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(earliest)
    }

    /// Marks one row as superseded. Not reversible.
    #[tracing::instrument(skip(self), fields(region = %self.region_code))]
    pub async fn mark_ingest_view_file_as_invalidated(&self, file_id: i64) -> MetadataResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE direct_ingest_view_file_metadata
            SET is_invalidated = TRUE
            WHERE file_id = $1 AND region_code = $2 AND instance = $3
            "#,
        )
        .bind(file_id)
        .bind(&self.region_code)
        .bind(self.instance.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(MetadataError::not_found(
                "Ingest view file metadata",
                &format!("file_id={file_id}"),
            ));
        }
        Ok(())
    }

    async fn get_metadata_by_file_id(&self, file_id: i64) -> MetadataResult<IngestViewFileMetadata> {
        let sql = format!(
            r#"{SELECT_COLUMNS}
            WHERE file_id = $1 AND region_code = $2 AND instance = $3
            "#
        );
        let record = sqlx::query_as::<_, IngestViewFileRecord>(&sql)
            .bind(file_id)
            .bind(&self.region_code)
            .bind(self.instance.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                MetadataError::not_found(
                    "Ingest view file metadata",
                    &format!("file_id={file_id}"),
                )
            })?;

        IngestViewFileMetadata::try_from(record)
    }

    async fn get_metadata_for_file_name(
        &self,
        file_name: &str,
    ) -> MetadataResult<IngestViewFileMetadata> {
        let sql = format!(
            r#"{SELECT_COLUMNS}
            WHERE region_code = $1
              AND instance = $2
              AND normalized_file_name = $3
              AND is_invalidated = FALSE
            "#
        );
        let records = sqlx::query_as::<_, IngestViewFileRecord>(&sql)
            .bind(&self.region_code)
            .bind(self.instance.as_str())
            .bind(file_name)
            .fetch_all(&self.pool)
            .await?;

        if records.len() > 1 {
            return Err(MetadataError::data_integrity(format!(
                "Unexpected number of metadata rows for file name [{}]: [{}]",
                file_name,
                records.len()
            )));
        }
        match records.into_iter().next() {
            Some(record) => IngestViewFileMetadata::try_from(record),
            None => Err(MetadataError::not_found("Ingest view file metadata", file_name)),
        }
    }
}
