//! Error taxonomy shared by every ragline component.
//!
//! Each variant maps to one failure class of the ingestion and retrieval
//! pipeline. [`Error::is_retryable`] is the single source of truth for
//! which failures the retry policy may repeat.

use thiserror::Error;

/// Main error type for ragline operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Object or document absent.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("parse failure: {0}")]
    ParseFailure(String),

    #[error("PII detection failed: {message}")]
    PiiDetectionFailure { message: String, retryable: bool },

    /// Transient embedding failure (throttling, network, upstream 5xx).
    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),

    /// Deterministic embedding rejection (oversized or malformed input).
    #[error("embedding rejected: {0}")]
    EmbeddingRejected(String),

    #[error("generation failed: {message}")]
    GenerationFailure { message: String, retryable: bool },

    #[error("object store failure: {0}")]
    ObjectStoreFailure(String),

    #[error("vector store failure: {0}")]
    VectorStoreFailure(String),

    /// Another ingestion for the same document is pending or running.
    #[error("ingestion already in progress (job {job_id})")]
    AlreadyInProgress { job_id: String },

    #[error("no context found for knowledge base '{0}'")]
    NoContextFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// A pipeline task died without producing a result.
    #[error("internal failure: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a failed external call may be attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::EmbeddingFailure(_) | Error::ObjectStoreFailure(_) => true,
            Error::PiiDetectionFailure { retryable, .. }
            | Error::GenerationFailure { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Short machine-readable name of the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NotFound",
            Error::UnsupportedFormat(_) => "UnsupportedFormat",
            Error::ParseFailure(_) => "ParseFailure",
            Error::PiiDetectionFailure { .. } => "PIIDetectionFailure",
            Error::EmbeddingFailure(_) => "EmbeddingFailure",
            Error::EmbeddingRejected(_) => "EmbeddingRejected",
            Error::GenerationFailure { .. } => "GenerationFailure",
            Error::ObjectStoreFailure(_) => "ObjectStoreFailure",
            Error::VectorStoreFailure(_) => "VectorStoreFailure",
            Error::AlreadyInProgress { .. } => "AlreadyInProgress",
            Error::NoContextFound(_) => "NoContextFound",
            Error::Config(_) => "Config",
            Error::Internal(_) => "Internal",
        }
    }

    pub fn pii(message: impl Into<String>, retryable: bool) -> Self {
        Error::PiiDetectionFailure {
            message: message.into(),
            retryable,
        }
    }

    pub fn generation(message: impl Into<String>, retryable: bool) -> Self {
        Error::GenerationFailure {
            message: message.into(),
            retryable,
        }
    }
}

/// Result type alias using ragline's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(Error::EmbeddingFailure("429".into()).is_retryable());
        assert!(Error::ObjectStoreFailure("reset".into()).is_retryable());
        assert!(Error::pii("throttled", true).is_retryable());
        assert!(Error::generation("503", true).is_retryable());
    }

    #[test]
    fn test_terminal_classes() {
        assert!(!Error::EmbeddingRejected("too long".into()).is_retryable());
        assert!(!Error::pii("bad request", false).is_retryable());
        assert!(!Error::UnsupportedFormat(".exe".into()).is_retryable());
        assert!(!Error::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn test_display_carries_job_id() {
        let err = Error::AlreadyInProgress {
            job_id: "abc".into(),
        };
        assert_eq!(err.to_string(), "ingestion already in progress (job abc)");
        assert_eq!(err.kind(), "AlreadyInProgress");
    }
}
