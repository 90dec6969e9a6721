//! Operator report over direct ingest file metadata
//!
//! Prints per-tag raw file rollups and the ingest view export backlog for
//! one region and instance. Read-only; safe to run against production.

use anyhow::Context;
use clap::Parser;
use jdp_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use jdp_common::types::IngestInstance;
use jdp_ingest::db::{create_pool, DbConfig};
use jdp_ingest::metadata::{IngestViewFileMetadataManager, RawFileMetadataManager};

#[derive(Debug, Parser)]
#[command(name = "metadata-report", about = "Report on direct ingest file metadata")]
struct Args {
    /// Region code, e.g. US_XX
    #[arg(long)]
    region: String,

    /// Ingest instance to report on
    #[arg(long, default_value = "PRIMARY")]
    instance: IngestInstance,

    /// Log debug output to the console
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let log_config = LogConfig::default()
        .with_level(if args.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Warn
        })
        .with_output(LogOutput::Console)
        .with_file_prefix("metadata-report");
    let log_config = LogConfig::from_env().unwrap_or(log_config);
    let _ = init_logging(&log_config);

    let db_config = DbConfig::from_env().context("loading database configuration")?;
    let pool = create_pool(&db_config).await.context("connecting to database")?;

    let raw = RawFileMetadataManager::new(pool.clone(), &args.region, args.instance);
    let views = IngestViewFileMetadataManager::new(pool, &args.region, args.instance);

    println!("Raw files for {} ({}):", raw.region_code(), args.instance);
    let summaries = raw.get_raw_file_metadata_summaries().await?;
    if summaries.is_empty() {
        println!("  (none)");
    }
    for summary in &summaries {
        println!(
            "  {:<40} processed={:<5} unprocessed={:<5} latest_upper_bound={}",
            summary.file_tag,
            summary.num_processed_files,
            summary.num_unprocessed_files,
            summary
                .latest_processed_upper_bound
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    println!(
        "  total unprocessed raw files: {}",
        raw.get_num_unprocessed_raw_files().await?
    );

    println!();
    println!("Ingest view export backlog:");
    let pending = views.get_ingest_view_metadata_pending_export().await?;
    if pending.is_empty() {
        println!("  (none)");
    }
    for metadata in &pending {
        println!(
            "  file_id={:<8} view={:<40} registered={} state={:?}",
            metadata.file_id,
            metadata.ingest_view_name,
            metadata.job_creation_time.to_rfc3339(),
            metadata.state(),
        );
    }
    println!(
        "  unprocessed ingest view files: {}",
        views.get_num_unprocessed_ingest_view_files().await?
    );
    if let Some(earliest) = views.get_date_of_earliest_unprocessed_ingest_view_file().await? {
        println!("  oldest unprocessed job registered at {}", earliest.to_rfc3339());
    }

    Ok(())
}
