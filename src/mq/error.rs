//! Message queue error types

use thiserror::Error;

/// Errors reported by a broker client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Offset commit rejected (group rebalance); safe to keep polling
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// A blocking call was interrupted by a wakeup
    #[error("Consumer woken up")]
    Wakeup,

    /// The producer's client-side buffer is full
    #[error("Producer buffer exhausted")]
    BufferExhausted,

    /// Connection to the broker failed or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Any other broker failure
    #[error("Broker error: {0}")]
    Other(String),
}

impl BrokerError {
    /// Whether the poll loop may continue with the same consumer
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::CommitFailed(_))
    }
}

/// Message queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// Broker client failure
    #[error("{0}")]
    Broker(#[from] BrokerError),

    /// A send failed for a reason other than buffer exhaustion
    #[error("Send to topic '{topic}' failed: {reason}")]
    Send {
        /// Destination topic
        topic: String,
        /// Failure description
        reason: String,
    },

    /// The topic buffer was closed
    #[error("Buffer for topic '{0}' is closed")]
    BufferClosed(String),

    /// A consumer worker terminated abnormally
    #[error("Consumer worker '{name}' failed: {reason}")]
    Worker {
        /// Worker name
        name: String,
        /// Failure description
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(BrokerError::CommitFailed("rebalance".into()).is_retryable());
        assert!(!BrokerError::Wakeup.is_retryable());
        assert!(!BrokerError::Connection("down".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = QueueError::Send {
            topic: "argusMetricQueue".into(),
            reason: "record too large".into(),
        };
        assert!(err.to_string().contains("argusMetricQueue"));
    }
}
