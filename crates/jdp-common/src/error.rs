//! Error types for JDP

use thiserror::Error;

/// Result type alias for JDP operations
pub type Result<T> = std::result::Result<T, JdpError>;

/// Main error type for JDP
#[derive(Error, Debug)]
pub enum JdpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid direct ingest file name: {0}")]
    InvalidFileName(String),

    #[error("Invalid storage path: {0}")]
    InvalidStoragePath(String),

    #[error("Invalid ingest instance: {0}")]
    InvalidInstance(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
