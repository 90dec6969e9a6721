//! Cloud storage path abstraction
//!
//! The metadata managers never list storage themselves; they are handed
//! paths by an external filesystem-listing component and only need the
//! bucket and the file name within it.

use serde::{Deserialize, Serialize};

use crate::error::JdpError;

/// A fully qualified path to a single file in cloud storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageFilePath {
    /// Bucket the file lives in
    pub bucket: String,
    /// Path of the blob within the bucket, e.g. "us_xx/unprocessed_...csv"
    pub blob_name: String,
}

impl StorageFilePath {
    pub fn new(bucket: impl Into<String>, blob_name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            blob_name: blob_name.into(),
        }
    }

    /// The file name, i.e. the final path component of the blob name.
    pub fn file_name(&self) -> &str {
        self.blob_name
            .rsplit_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.blob_name)
    }

    /// The full "bucket/blob" path, used in error messages and logs.
    pub fn abs_path(&self) -> String {
        format!("{}/{}", self.bucket, self.blob_name)
    }

    /// Parses a "bucket/some/blob/name" string into a path.
    pub fn from_absolute_path(path: &str) -> Result<Self, JdpError> {
        match path.split_once('/') {
            Some((bucket, blob_name)) if !bucket.is_empty() && !blob_name.is_empty() => {
                Ok(Self::new(bucket, blob_name))
            },
            _ => Err(JdpError::InvalidStoragePath(path.to_string())),
        }
    }
}

impl std::fmt::Display for StorageFilePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.abs_path())
    }
}
