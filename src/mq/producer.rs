//! Queue producer
//!
//! Serializes items and hands them to the broker client. Sends run as tasks
//! bounded by a semaphore; a batch is submitted in full before its results are
//! collected, in submission order.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, trace, warn};

use super::broker::{BrokerClientFactory, BrokerProducer, DeliveryReceipt};
use super::error::{BrokerError, QueueError};
use crate::config::{ProducerConfig, QueueConfig};
use crate::error::{require_argument, require_state, Error, Result};
use crate::metrics;

/// Sends serialized items to broker topics
pub struct QueueProducer {
    client: Arc<dyn BrokerProducer>,
    config: ProducerConfig,
    semaphore: Arc<Semaphore>,
    permits: usize,
    closed: AtomicBool,
}

impl QueueProducer {
    /// Create a producer using the producer properties of `config`
    pub fn new(config: &QueueConfig, factory: Arc<dyn BrokerClientFactory>) -> Result<Self> {
        let client = factory.create_producer(&config.producer_properties())?;
        let permits = config.producer.effective_connections();
        info!(
            brokers = %config.broker.brokers,
            connections = permits,
            "Queue producer created"
        );
        Ok(Self {
            client,
            config: config.producer.clone(),
            semaphore: Arc::new(Semaphore::new(permits)),
            permits,
            closed: AtomicBool::new(false),
        })
    }

    /// Send every item to `topic`
    ///
    /// Strings are sent as-is, anything else as JSON. Items that fail to serialize
    /// are skipped. Returns how many items the client buffered; items rejected
    /// because the client buffer is full are not counted. Any other send failure
    /// fails the whole call once every in-flight send has finished.
    pub async fn enqueue<T>(&self, topic: &str, items: Vec<T>) -> Result<usize>
    where
        T: Serialize + 'static,
    {
        require_argument(!topic.trim().is_empty(), "Topic cannot be null or empty.")?;
        require_state(
            !self.closed.load(Ordering::Acquire),
            "Producer has been shut down.",
        )?;

        let mut sends = Vec::with_capacity(items.len());
        for item in items {
            let payload = match encode(item) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Failed to serialize item, skipping");
                    metrics::record_enqueue("skipped");
                    continue;
                }
            };

            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| Error::IllegalState("Producer has been shut down.".to_string()))?;
            let client = Arc::clone(&self.client);
            let destination = topic.to_string();

            sends.push(tokio::spawn(async move {
                let result = client.send(&destination, payload).await;
                drop(permit);
                result
            }));
        }

        let mut buffered = 0;
        let mut fatal: Option<String> = None;
        for send in sends {
            match send.await {
                Ok(Ok(receipt)) => {
                    buffered += 1;
                    metrics::record_enqueue("buffered");
                    spawn_delivery_log(topic.to_string(), receipt);
                }
                Ok(Err(BrokerError::BufferExhausted)) => {
                    warn!(topic = %topic, "Producer buffer exhausted, message not sent");
                    metrics::record_enqueue("failed");
                }
                Ok(Err(e)) => {
                    metrics::record_enqueue("failed");
                    fatal.get_or_insert_with(|| e.to_string());
                }
                Err(e) => {
                    metrics::record_enqueue("failed");
                    fatal.get_or_insert_with(|| format!("send task failed: {}", e));
                }
            }
        }

        if let Some(reason) = fatal {
            return Err(QueueError::Send {
                topic: topic.to_string(),
                reason,
            }
            .into());
        }

        debug!(topic = %topic, buffered, "Enqueued messages");
        Ok(buffered)
    }

    /// Stop accepting work, wait for in-flight sends and close the client
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let timeout = self.config.shutdown_timeout();
        match tokio::time::timeout(timeout, self.semaphore.acquire_many(self.permits as u32)).await
        {
            Ok(Ok(_all)) => {
                debug!("All in-flight sends finished");
            }
            Ok(Err(_)) => {
                debug!("Producer semaphore already closed");
            }
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    in_flight = self.permits - self.semaphore.available_permits(),
                    "Producer shutdown timed out, forcing close"
                );
            }
        }
        self.semaphore.close();
        self.client.close().await;
        info!("Queue producer shut down");
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for QueueProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueProducer")
            .field("permits", &self.permits)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

fn spawn_delivery_log(topic: String, receipt: DeliveryReceipt) {
    tokio::spawn(async move {
        match receipt.wait().await {
            Ok(meta) => trace!(
                topic = %meta.topic,
                partition = meta.partition,
                offset = meta.offset,
                "Message delivered"
            ),
            Err(e) => warn!(topic = %topic, error = %e, "Message delivery failed"),
        }
    });
}

/// Payload for `item`: strings pass through, everything else becomes JSON
fn encode<T: Serialize + 'static>(item: T) -> serde_json::Result<String> {
    let mut slot = Some(item);
    let any = &mut slot as &mut dyn Any;
    if let Some(text) = any.downcast_mut::<Option<String>>().and_then(Option::take) {
        return Ok(text);
    }
    if let Some(text) = any.downcast_mut::<Option<&'static str>>().and_then(Option::take) {
        return Ok(text.to_string());
    }
    match slot {
        Some(item) => serde_json::to_string(&item),
        None => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mq::memory::InMemoryBroker;
    use crate::types::Metric;
    use serde::ser::Error as _;

    fn producer(broker: &InMemoryBroker) -> QueueProducer {
        QueueProducer::new(&QueueConfig::default(), Arc::new(broker.clone())).unwrap()
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
            Err(S::Error::custom("not serializable"))
        }
    }

    #[test]
    fn test_encode_passthrough_and_json() {
        assert_eq!(encode("raw text".to_string()).unwrap(), "raw text");
        assert_eq!(encode("static").unwrap(), "static");
        let json = encode(Metric::new("s", "m")).unwrap();
        assert!(json.starts_with('{'));
        assert!(encode(Unserializable).is_err());
    }

    #[tokio::test]
    async fn test_enqueue_strings_and_objects() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);

        let sent = producer
            .enqueue("t", vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(sent, 2);

        let sent = producer
            .enqueue("m", vec![Metric::new("s", "cpu")])
            .await
            .unwrap();
        assert_eq!(sent, 1);

        let mut sent_values = broker.messages("t");
        sent_values.sort();
        assert_eq!(sent_values, vec!["a", "b"]);
        let metric: Metric = serde_json::from_str(&broker.messages("m")[0]).unwrap();
        assert_eq!(metric.metric, "cpu");
    }

    #[tokio::test]
    async fn test_buffer_exhausted_is_not_counted() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);
        broker.inject_send_error(BrokerError::BufferExhausted);

        let sent = producer
            .enqueue("t", vec!["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(sent, 2);
        assert_eq!(broker.messages("t").len(), 2);
    }

    #[tokio::test]
    async fn test_other_send_error_is_fatal() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);
        broker.inject_send_error(BrokerError::Connection("broker down".to_string()));

        let err = producer
            .enqueue("t", vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Queue(QueueError::Send { .. })));
        // the other in-flight send still completed
        assert_eq!(broker.messages("t").len(), 1);
    }

    #[tokio::test]
    async fn test_unserializable_items_are_skipped() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);
        let sent = producer.enqueue("t", vec![Unserializable]).await.unwrap();
        assert_eq!(sent, 0);
        assert!(broker.messages("t").is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);
        producer.shutdown().await;
        assert!(producer.is_shut_down());
        let err = producer.enqueue("t", vec!["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::IllegalState(_)));
    }

    #[tokio::test]
    async fn test_blank_topic_rejected() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);
        let err = producer.enqueue(" ", vec!["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
