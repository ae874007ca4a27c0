//! Broker client traits
//!
//! The queue consumer and producer talk to the broker only through these traits.
//! A [`BrokerClientFactory`] builds clients from a string property map that is
//! passed through unmodified, so any broker with a string-keyed client
//! configuration can be plugged in.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::error::BrokerError;

/// String-keyed broker client configuration
pub type ClientProperties = BTreeMap<String, String>;

/// Poll timeout used by consumer workers; polls are raced against shutdown instead
pub const UNBOUNDED_POLL_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

// =============================================================================
// Records
// =============================================================================

/// A record returned by a consumer poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerRecord {
    /// Topic the record was read from
    pub topic: String,
    /// Partition within the topic
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Payload; tombstones carry no value
    pub value: Option<String>,
}

/// Where a produced record landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    /// Topic
    pub topic: String,
    /// Partition
    pub partition: i32,
    /// Offset
    pub offset: i64,
}

/// Completion handle for an accepted send
#[derive(Debug)]
pub struct DeliveryReceipt {
    rx: oneshot::Receiver<Result<RecordMetadata, BrokerError>>,
}

impl DeliveryReceipt {
    /// Create a receipt and the sender that completes it
    pub fn channel() -> (oneshot::Sender<Result<RecordMetadata, BrokerError>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Receipt that is already complete
    pub fn completed(result: Result<RecordMetadata, BrokerError>) -> Self {
        let (tx, receipt) = Self::channel();
        let _ = tx.send(result);
        receipt
    }

    /// Wait for the delivery outcome
    pub async fn wait(self) -> Result<RecordMetadata, BrokerError> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(BrokerError::Other("delivery receipt dropped".to_string())))
    }
}

// =============================================================================
// Client traits
// =============================================================================

/// A broker consumer owned by a single worker
#[async_trait]
pub trait BrokerConsumer: Send + 'static {
    /// Subscribe to `topics`
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError>;

    /// Fetch the next records, waiting up to `timeout`
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<ConsumerRecord>, BrokerError>;

    /// Commit the offsets of everything returned so far
    async fn commit(&mut self) -> Result<(), BrokerError>;

    /// Release the consumer
    async fn close(&mut self);
}

/// A broker producer shared by concurrent senders
#[async_trait]
pub trait BrokerProducer: Send + Sync + 'static {
    /// Hand `payload` to the client
    ///
    /// Returns once the record is buffered; the receipt completes on delivery.
    /// A full client buffer is reported as [`BrokerError::BufferExhausted`].
    async fn send(&self, topic: &str, payload: String) -> Result<DeliveryReceipt, BrokerError>;

    /// Stop accepting records and release the client
    async fn close(&self);
}

/// Builds broker clients from property maps
pub trait BrokerClientFactory: Send + Sync + 'static {
    /// New consumer for `properties`
    fn create_consumer(
        &self,
        properties: &ClientProperties,
    ) -> Result<Box<dyn BrokerConsumer>, BrokerError>;

    /// New producer for `properties`
    fn create_producer(
        &self,
        properties: &ClientProperties,
    ) -> Result<Arc<dyn BrokerProducer>, BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completed_receipt() {
        let meta = RecordMetadata {
            topic: "t".to_string(),
            partition: 0,
            offset: 7,
        };
        let receipt = DeliveryReceipt::completed(Ok(meta.clone()));
        assert_eq!(receipt.wait().await.unwrap(), meta);
    }

    #[tokio::test]
    async fn test_dropped_receipt_is_an_error() {
        let (tx, receipt) = DeliveryReceipt::channel();
        drop(tx);
        assert!(matches!(receipt.wait().await, Err(BrokerError::Other(_))));
    }
}
