//! JDP Common Library
//!
//! Shared types, utilities, and error handling for the JDP project.
//!
//! # Overview
//!
//! This crate provides common functionality used across all JDP workspace
//! members:
//!
//! - **Error Handling**: Custom error types and result types
//! - **Logging**: Centralized tracing initialization
//! - **Types**: Shared domain types (ingest instances, storage paths,
//!   normalized file names, state entities)
//!
//! # Example
//!
//! ```no_run
//! use jdp_common::types::DirectIngestFileParts;
//!
//! fn tag_for_file(file_name: &str) -> jdp_common::Result<String> {
//!     let parts = DirectIngestFileParts::parse(file_name)?;
//!     Ok(parts.file_tag)
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{JdpError, Result};
