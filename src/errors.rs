//! Typed error taxonomy shared across the library.
//!
//! Every failure carries a machine-readable code (see [`Error::code`]) that
//! the HTTP layer serializes into the standard error body:
//!
//! ```json
//! { "error": { "code": "VERSION_CONFLICT", "message": "..." } }
//! ```
//!
//! User-correctable failures ([`Error::MarkerInvalid`],
//! [`Error::VersionConflict`]) abort the current operation without touching
//! session state. [`Error::Internal`] marks consistency violations that
//! should be unreachable and indicate a programming error.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or tampered page-marker structure in edited text.
    #[error("page marker validation failed: {reason}")]
    MarkerInvalid { reason: String },

    /// Stale mutation: the caller's version no longer matches the session.
    #[error("version conflict: expected {expected}, but current version is {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    /// Existing index vector size disagrees with the model's dimension.
    #[error("dimension mismatch for index '{index_name}': expected {expected}, got {actual}")]
    DimensionMismatch {
        index_name: String,
        expected: usize,
        actual: usize,
    },

    /// Upstream extractor failure, surfaced verbatim and never retried here.
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    /// Embedding provider failure for a batch of texts.
    #[error("embedding generation failed: {0}")]
    EmbeddingFailed(String),

    /// Chunk strategy outside its documented bounds.
    #[error("invalid chunk strategy: {0}")]
    InvalidStrategy(String),

    /// Malformed request input outside the other categories.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("chunk not found: {chunk_id} in session {session_id}")]
    ChunkNotFound {
        session_id: String,
        chunk_id: String,
    },

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Consistency violation that should be unreachable.
    #[error("internal consistency error: {0}")]
    Internal(String),
}

impl Error {
    pub fn marker_invalid(reason: impl Into<String>) -> Self {
        Error::MarkerInvalid {
            reason: reason.into(),
        }
    }

    /// Machine-readable error code for API responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Error::MarkerInvalid { .. } => "PAGE_MARKER_INVALID",
            Error::VersionConflict { .. } => "VERSION_CONFLICT",
            Error::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Error::ExtractionFailed(_) => "EXTRACTION_FAILED",
            Error::EmbeddingFailed(_) => "EMBEDDING_FAILED",
            Error::InvalidStrategy(_) => "INVALID_STRATEGY",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Error::ChunkNotFound { .. } => "CHUNK_NOT_FOUND",
            Error::JobNotFound(_) => "JOB_NOT_FOUND",
            Error::IndexNotFound(_) => "INDEX_NOT_FOUND",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Serde(_) => "SERIALIZATION_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
