use thiserror::Error;

/// Errors from vector store operations (used by trait definitions in memweave-core).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector store connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("record not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("collection '{0}' does not exist")]
    MissingCollection(String),

    #[error("vector store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Transport-level failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Connection(_))
    }
}

/// Errors from the embedding service.
///
/// An embedder never returns a degenerate vector in place of an error.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding service error: {0}")]
    Service(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding request timed out after {0}ms")]
    Timeout(u64),

    #[error("embedding service returned no vector")]
    Empty,
}

impl EmbeddingError {
    /// Service failures (including throttling) and timeouts may clear up on
    /// another attempt; a wrong-shaped answer will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbeddingError::Service(_) | EmbeddingError::Timeout(_))
    }
}

/// Errors persisting run state (progress file, result records).
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Model output that could not be recovered into structured JSON.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed model response: {reason}")]
pub struct MalformedResponse {
    pub reason: String,
}

impl MalformedResponse {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Why a single decision was skipped instead of applied.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    #[error("temp id '{0}' is not in the current batch mapping")]
    UnknownReference(String),

    #[error("decision payload rejected: {0}")]
    InvalidDecision(String),

    #[error("failed to apply action: {0}")]
    ActionApplyFailure(String),

    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),
}

impl From<StoreError> for SkipReason {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection(msg) | StoreError::Unavailable(msg) => {
                SkipReason::StoreUnavailable(msg)
            }
            other => SkipReason::ActionApplyFailure(other.to_string()),
        }
    }
}

impl From<EmbeddingError> for SkipReason {
    fn from(err: EmbeddingError) -> Self {
        SkipReason::EmbeddingFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn test_dimension_mismatch_display() {
        let err = EmbeddingError::DimensionMismatch {
            expected: 1536,
            actual: 384,
        };
        assert!(err.to_string().contains("1536"));
        assert!(err.to_string().contains("384"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(EmbeddingError::Timeout(10).is_retryable());
        assert!(EmbeddingError::Service("429 Too Many Requests".into()).is_retryable());
        assert!(!EmbeddingError::Empty.is_retryable());
        assert!(
            !EmbeddingError::DimensionMismatch {
                expected: 8,
                actual: 3
            }
            .is_retryable()
        );

        assert!(StoreError::Unavailable("503".into()).is_retryable());
        assert!(StoreError::Connection("reset".into()).is_retryable());
        assert!(!StoreError::Conflict("dup".into()).is_retryable());
        assert!(!StoreError::MissingCollection("memories".into()).is_retryable());
    }

    #[test]
    fn test_store_errors_map_to_skip_reasons() {
        let skip: SkipReason = StoreError::Unavailable("down".into()).into();
        assert_eq!(skip, SkipReason::StoreUnavailable("down".into()));

        let skip: SkipReason = StoreError::NotFound.into();
        assert!(matches!(skip, SkipReason::ActionApplyFailure(_)));
    }

    #[test]
    fn test_skip_reason_serializes_tagged() {
        let json = serde_json::to_value(SkipReason::UnknownReference("7".into())).unwrap();
        assert_eq!(json["kind"], "unknown_reference");
        assert_eq!(json["detail"], "7");
    }
}
