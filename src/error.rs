//! Error taxonomy shared by the pipeline, the record store, and the
//! external-service clients.
//!
//! Per-item failures (one file, one chunk, one query) surface as one of
//! these variants and are caught at the item boundary by the caller. A
//! lookup that finds nothing is not an error: store getters return
//! `Ok(None)` instead.

use std::path::PathBuf;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A run-level problem (missing input folder, bad glob). Aborts the run.
    #[error("configuration error: {0}")]
    Config(String),

    /// The input document is unreadable or corrupt. The file is skipped.
    #[error("extraction failed for {path}: {reason}")]
    Extraction { path: PathBuf, reason: String },

    /// No embedder is configured or it failed to initialise.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The embedder was available but a single call failed.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The vector service is unreachable, misconfigured, or rejected a call.
    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// A relational write or read failed. Writes are rolled back.
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// A stored JSON column could not be encoded or decoded.
    #[error("persistence error: malformed json column: {0}")]
    Json(#[from] serde_json::Error),

    /// A document status change that the lifecycle does not allow.
    #[error("invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    /// The work-tracking service rejected a request or returned garbage.
    #[error("work tracker error: {0}")]
    Tracker(String),
}

impl Error {
    /// Whether the error came from an unavailable external capability
    /// (embedder or vector index) rather than bad input.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::EmbeddingUnavailable(_) | Error::IndexUnavailable(_)
        )
    }
}

