//! Error types for the launcher core

use thiserror::Error;

/// Failures surfaced by the coordinator and its collaborators
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Malformed entity {entity}: {reason}")]
    MalformedEntity { entity: String, reason: String },

    #[error("Index corruption: {0}")]
    IndexCorruption(String),

    #[error("Usage table flush failed: {0}")]
    PersistenceWriteFailure(#[source] anyhow::Error),

    #[error("Search exceeded its {budget_ms}ms budget")]
    QueryTimeout { budget_ms: u64 },

    #[error("Unknown candidate: {0}")]
    UnknownCandidate(String),
}
