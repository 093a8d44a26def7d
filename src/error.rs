//! Error taxonomy for the knowledge-base pipeline.
//!
//! Per-page fetch failures, missing sitemaps and per-collection eviction
//! failures never reach this type: they are logged where they happen and the
//! pipeline carries on. What remains here is what a caller must act on.

use thiserror::Error;

/// Errors surfaced to callers of the crawl / build / query operations.
#[derive(Debug, Error)]
pub enum KbError {
    /// A request parameter is out of range or malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No URLs or paths were resolved from the supplied seeds.
    #[error("no locations to process: {0}")]
    NoLocations(String),

    /// Locations were resolved but no document survived extraction and filtering.
    #[error("no documents found: {0}")]
    NoDocuments(String),

    /// Every embedding tier failed, or the store rejected the inserted records.
    #[error("failed to build index for collection {collection}: {reason}")]
    IndexBuild { collection: String, reason: String },

    /// The requested collection does not exist in persistent storage.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KbError {
    /// Short machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            KbError::InvalidInput(_) => "bad_request",
            KbError::NoLocations(_) => "no_locations",
            KbError::NoDocuments(_) => "no_documents",
            KbError::IndexBuild { .. } => "index_build",
            KbError::CollectionNotFound(_) => "not_found",
            KbError::Other(_) => "internal",
        }
    }
}

pub type KbResult<T> = std::result::Result<T, KbError>;
