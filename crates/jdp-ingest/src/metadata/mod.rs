//! File metadata managers for direct ingest
//!
//! Every raw extract file and every ingest view export job gets a metadata
//! row in the operations database. The managers in this module are the only
//! writers of those rows and enforce the lifecycle invariants at the call
//! boundary:
//!
//! - raw files: discovered once (idempotently), processed exactly once,
//!   invalidated when superseded by a corrected re-upload;
//! - ingest view files: CREATED -> NAME_REGISTERED -> EXPORTED -> PROCESSED,
//!   with INVALIDATED reachable from any state and terminal.
//!
//! Invariant violations are data-integrity errors: fatal at the call site,
//! surfaced to an operator, never retried. Benign absence (a file nobody has
//! discovered yet, an empty pending-export queue) is a `false`/empty result,
//! never an error.

mod ingest_view_file;
mod models;
mod raw_file;

use thiserror::Error;

pub use ingest_view_file::IngestViewFileMetadataManager;
pub use models::{
    IngestViewExportArgs, IngestViewFileMetadata, IngestViewFileState, RawFileMetadata,
    RawFileMetadataSummary,
};
pub use raw_file::RawFileMetadataManager;

/// Result type alias for metadata operations
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

/// Errors produced by the metadata managers.
///
/// `Sqlx` wraps transient store errors, which propagate unchanged — retry
/// policy belongs to the caller. `NotFound` and `DataIntegrity` are terminal
/// for the operation that produced them.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// SQL query or connection error
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Database configuration is invalid or missing
    #[error("Database configuration error: {0}")]
    Config(String),

    /// Requested metadata row does not exist
    #[error("{0}")]
    NotFound(String),

    /// The store or the requested transition violates a lifecycle invariant
    #[error("{0}")]
    DataIntegrity(String),

    /// Invalid path or file name handed in by the caller
    #[error(transparent)]
    Common(#[from] jdp_common::JdpError),
}

impl MetadataError {
    pub fn not_found(resource: &str, identifier: &str) -> Self {
        Self::NotFound(format!("{resource} [{identifier}] not found"))
    }

    pub fn data_integrity(message: impl Into<String>) -> Self {
        Self::DataIntegrity(message.into())
    }

    /// True for errors a caller may meaningfully handle as "row absent".
    pub fn is_not_found(&self) -> bool {
        matches!(self, MetadataError::NotFound(_))
    }
}
