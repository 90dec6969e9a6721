//! Common types used across JDP

mod filename;
mod instance;
mod paths;
mod violations;

pub use filename::{
    build_normalized_file_name, DirectIngestFileParts, DirectIngestFileType,
    CODE_TABLE_TAG_PREFIX,
};
pub use instance::IngestInstance;
pub use paths::StorageFilePath;
pub use violations::{
    ViolatedConditionEntry, Violation, ViolationResponse, ViolationType, ViolationTypeEntry,
};
