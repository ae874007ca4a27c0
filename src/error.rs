//! Error types for the query engine and message queue

use thiserror::Error;

pub use crate::mq::error::{BrokerError, QueueError};
pub use crate::query::error::{QueryError, QueryErrorKind};

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Caller supplied an argument that violates a precondition
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation is not allowed in the current state (disposed, disabled, shut down)
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Query evaluation error
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Message queue error
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<BrokerError> for Error {
    fn from(e: BrokerError) -> Self {
        Error::Queue(QueueError::Broker(e))
    }
}

/// Fail fast with [`Error::InvalidArgument`] when a precondition does not hold
pub(crate) fn require_argument(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::InvalidArgument(message.to_string()))
    }
}

/// Fail fast with [`Error::IllegalState`] when a state requirement does not hold
pub(crate) fn require_state(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::IllegalState(message.to_string()))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
