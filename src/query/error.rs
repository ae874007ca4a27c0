//! Query evaluation errors
//!
//! Every failure carries a [`QueryErrorKind`] so callers can tell bad input
//! (parse, validation, unknown transform) from collaborator failures.

use std::fmt;

use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Query evaluation failure
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct QueryError {
    /// Category
    pub kind: QueryErrorKind,
    /// Description
    pub message: String,
    #[source]
    source: Option<BoxedSource>,
}

impl QueryError {
    /// Error of `kind`
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The expression could not be read into a tree
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ParseError, message)
    }

    /// Bad query or transform arguments
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ValidationError, message)
    }

    /// A collaborator or transform failed
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ExecutionError, message)
    }

    /// A configured limit was exceeded
    pub fn resource_limit(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ResourceLimit, message)
    }

    /// Unknown transform
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::NotFound, message)
    }

    /// Whether the caller's input caused the failure
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind,
            QueryErrorKind::ParseError
                | QueryErrorKind::ValidationError
                | QueryErrorKind::NotFound
                | QueryErrorKind::ResourceLimit
        )
    }
}

/// Failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryErrorKind {
    /// Expression could not be turned into a query tree
    ParseError,
    /// Query or transform arguments are invalid
    ValidationError,
    /// A collaborator (discovery, storage, transform) failed
    ExecutionError,
    /// Query tree deeper than allowed
    ResourceLimit,
    /// Transform not registered
    NotFound,
    /// Broken invariant inside the evaluator
    Internal,
}

impl QueryErrorKind {
    /// Stable name
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryErrorKind::ParseError => "ParseError",
            QueryErrorKind::ValidationError => "ValidationError",
            QueryErrorKind::ExecutionError => "ExecutionError",
            QueryErrorKind::ResourceLimit => "ResourceLimit",
            QueryErrorKind::NotFound => "NotFound",
            QueryErrorKind::Internal => "Internal",
        }
    }
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of query evaluation steps
pub type QueryResult<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_display_includes_kind() {
        let err = QueryError::not_found("transform 'BOGUS' is not registered");
        let display = err.to_string();
        assert!(display.starts_with("NotFound: "));
        assert!(display.contains("BOGUS"));
    }

    #[test]
    fn test_source_chain() {
        let parse_err = "abc".parse::<f64>().unwrap_err();
        let err = QueryError::validation("fill value is not a number").with_source(parse_err);
        assert!(err.source().is_some());
        assert!(QueryError::execution("storage down").source().is_none());
    }

    #[test]
    fn test_client_errors() {
        assert!(QueryError::parse("x").is_client_error());
        assert!(QueryError::resource_limit("too deep").is_client_error());
        assert!(!QueryError::execution("storage down").is_client_error());
        assert!(!QueryError::new(QueryErrorKind::Internal, "bug").is_client_error());
    }
}
