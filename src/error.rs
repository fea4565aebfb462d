use std::fmt::Display;

use thiserror::Error;

/// Error type for query and mutation operations.
///
/// Producer failures are captured into query state and handed to every
/// observer, so the error is cheap to clone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Fetch failed: {0}")]
    FetchError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    /// The key could not be normalized into a [`QueryKey`](crate::key::QueryKey).
    #[error("A valid query key is required: {0}")]
    InvalidKey(String),

    /// The key is already registered with a different data type.
    #[error("Query {key} is registered with a different data type")]
    TypeMismatch { key: String },

    /// No producer was supplied and none is registered for the key.
    #[error("No query function available for {0}")]
    MissingFetcher(String),

    /// A caller-supplied hook failed.
    #[error("Callback failed: {0}")]
    Callback(String),
}

impl QueryError {
    /// Wraps any displayable error as a [`QueryError::FetchError`].
    pub fn fetch(err: impl Display) -> Self {
        Self::FetchError(err.to_string())
    }

    /// Wraps any displayable error as a [`QueryError::Callback`].
    pub fn callback(err: impl Display) -> Self {
        Self::Callback(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_display() {
        let err = QueryError::FetchError("test error".to_string());
        assert_eq!(err.to_string(), "Fetch failed: test error");

        let err = QueryError::NetworkError("network error".to_string());
        assert_eq!(err.to_string(), "Network error: network error");

        let err = QueryError::TypeMismatch {
            key: "[\"todos\"]".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Query [\"todos\"] is registered with a different data type"
        );
    }

    #[test]
    fn test_fetch_wraps_display() {
        let err = QueryError::fetch(std::fmt::Error);
        assert!(matches!(err, QueryError::FetchError(_)));
    }
}
