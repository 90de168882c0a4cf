//! Error types shared by the loader, the index and the HTTP boundary.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SearchError>;

/// Everything that can go wrong between opening a feature container and
/// answering a similarity query.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The feature container does not exist or cannot be opened.
    #[error("feature store not found: {path}")]
    StoreNotFound { path: String },

    /// The container was readable but its contents are not a valid
    /// collection of equally sized numeric vectors.
    #[error("malformed feature store: {0}")]
    MalformedStore(String),

    /// The requested number of projection components cannot be fit.
    #[error(
        "invalid projection rank {requested}: must be between 1 and min(samples={samples}, features={features})"
    )]
    InvalidProjectionRank {
        requested: usize,
        samples: usize,
        features: usize,
    },

    /// The identifier is not part of the active index.
    #[error("no such item: {0}")]
    UnknownIdentifier(i64),

    /// A vector of the wrong length was handed to the index.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// No index has been built yet.
    #[error("similarity index is not ready")]
    IndexNotReady,

    /// Another rebuild is currently running.
    #[error("an index rebuild is already in progress")]
    BuildInProgress,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SearchError {
    /// Whether the error only concerns the caller that triggered it.
    ///
    /// Query-time failures are recoverable: the active index stays valid
    /// and other requests are unaffected. Load and build failures abort
    /// the build attempt that produced them.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SearchError::UnknownIdentifier(_)
                | SearchError::DimensionMismatch { .. }
                | SearchError::IndexNotReady
                | SearchError::BuildInProgress
        )
    }
}

#[cfg(test)]
mod error_test {
    use super::*;

    #[test]
    fn test_query_errors_are_recoverable() {
        assert!(SearchError::UnknownIdentifier(999).is_recoverable());
        assert!(SearchError::IndexNotReady.is_recoverable());
        assert!(SearchError::BuildInProgress.is_recoverable());
    }

    #[test]
    fn test_build_errors_are_fatal() {
        let err = SearchError::InvalidProjectionRank {
            requested: 64,
            samples: 0,
            features: 0,
        };
        assert!(!err.is_recoverable());
        assert!(!SearchError::MalformedStore("bad".to_string()).is_recoverable());
        assert!(
            !SearchError::StoreNotFound {
                path: "missing".to_string()
            }
            .is_recoverable()
        );
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(SearchError::UnknownIdentifier(42).to_string(), "no such item: 42");
        let err = SearchError::DimensionMismatch {
            expected: 4,
            actual: 3,
        };
        assert_eq!(err.to_string(), "dimension mismatch: expected 4, got 3");
    }
}
