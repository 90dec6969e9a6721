//! Entity normalization
//!
//! Post-ingest passes that clean up hydrated entities before they reach
//! calculation pipelines. Normalization is pure: it consumes entity values
//! and returns new ones, with all state-specific behavior injected through
//! a delegate trait.

mod violation_responses;

pub use violation_responses::{
    normalized_violation_responses_for_calculations, ViolationResponseNormalizationDelegate,
};
