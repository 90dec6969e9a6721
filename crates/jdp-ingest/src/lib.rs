//! JDP Direct Ingest Library
//!
//! The direct ingest core of the JDP platform: tracking metadata for every
//! raw extract file and ingest view export, and converting exported ingest
//! view rows into hydrated entity trees.
//!
//! # Overview
//!
//! - **Metadata managers** ([`metadata`]): Postgres-backed lifecycle
//!   tracking for raw files (discovered -> processed) and ingest view
//!   export jobs (created -> name registered -> exported -> processed),
//!   with invalidation as a terminal state. Re-runs are idempotent and
//!   invariant violations fail loudly.
//! - **Manifest interpreter** ([`manifest`]): a declarative YAML language
//!   describing how one flat ingest view row maps onto a nested entity
//!   tree, evaluated as a pure function of (manifest, row).
//! - **Normalization** ([`normalization`]): state-specific cleanup of
//!   hydrated entities before calculation, currently violation response
//!   de-duplication and augmentation.
//!
//! The managers perform exactly one logical store write per call and make no
//! retry decisions; transient database errors propagate to the caller.

pub mod db;
pub mod manifest;
pub mod metadata;
pub mod normalization;
