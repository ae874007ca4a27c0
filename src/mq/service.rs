//! Message service facade
//!
//! Bundles a producer and a consumer behind one handle, maps the logical queues
//! onto configured topic names, and validates arguments before any broker work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, info};

use super::broker::BrokerClientFactory;
use super::consumer::QueueConsumer;
use super::producer::QueueProducer;
use crate::config::{QueueConfig, TopicsConfig};
use crate::error::{require_argument, require_state, Error, Result};

/// Logical queues with configurable topic names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    /// Alert notifications
    Alert,
    /// Annotations
    Annotation,
    /// Metric submissions
    Metric,
}

impl Queue {
    /// Every logical queue
    pub const ALL: [Queue; 3] = [Queue::Alert, Queue::Annotation, Queue::Metric];

    /// Well-known name of the queue
    pub fn name(&self) -> &'static str {
        match self {
            Queue::Alert => "argusAlertQueue",
            Queue::Annotation => "argusAnnotationQueue",
            Queue::Metric => "argusMetricQueue",
        }
    }

    /// Queue with the well-known `name`
    pub fn from_name(name: &str) -> Option<Queue> {
        Self::ALL.into_iter().find(|q| q.name() == name)
    }

    /// Configured topic of the queue
    pub fn topic<'a>(&self, topics: &'a TopicsConfig) -> &'a str {
        match self {
            Queue::Alert => &topics.alerts,
            Queue::Annotation => &topics.annotations,
            Queue::Metric => &topics.metrics,
        }
    }
}

impl std::fmt::Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Producer and consumer behind one handle
pub struct MessageService {
    topics: TopicsConfig,
    producer: Option<QueueProducer>,
    consumer: Option<QueueConsumer>,
    disposed: AtomicBool,
}

impl MessageService {
    /// Create the service; either side can be disabled in `config`
    pub fn new(config: &QueueConfig, factory: Arc<dyn BrokerClientFactory>) -> Result<Self> {
        let producer = if config.disable_producer {
            info!("Queue producer disabled");
            None
        } else {
            Some(QueueProducer::new(config, factory.clone())?)
        };
        let consumer = if config.disable_consumer {
            info!("Queue consumer disabled");
            None
        } else {
            Some(QueueConsumer::new(config, factory))
        };

        Ok(Self {
            topics: config.topics.clone(),
            producer,
            consumer,
            disposed: AtomicBool::new(false),
        })
    }

    /// Topic a queue name resolves to; unknown names are used as-is
    pub fn resolve_topic(&self, name: &str) -> String {
        match Queue::from_name(name) {
            Some(queue) => queue.topic(&self.topics).to_string(),
            None => name.to_string(),
        }
    }

    /// The producer, unless disabled
    pub fn producer(&self) -> Option<&QueueProducer> {
        self.producer.as_ref()
    }

    /// The consumer, unless disabled
    pub fn consumer(&self) -> Option<&QueueConsumer> {
        self.consumer.as_ref()
    }

    fn ensure_live(&self) -> Result<()> {
        require_state(
            !self.disposed.load(Ordering::Acquire),
            "Message service has been disposed.",
        )
    }

    fn live_producer(&self) -> Result<&QueueProducer> {
        self.ensure_live()?;
        self.producer
            .as_ref()
            .ok_or_else(|| Error::IllegalState("Queue producer is disabled.".to_string()))
    }

    fn live_consumer(&self) -> Result<&QueueConsumer> {
        self.ensure_live()?;
        self.consumer
            .as_ref()
            .ok_or_else(|| Error::IllegalState("Queue consumer is disabled.".to_string()))
    }

    /// Send `items` to `queue`, returning how many were buffered
    pub async fn enqueue<T>(&self, queue: &str, items: Vec<T>) -> Result<usize>
    where
        T: Serialize + 'static,
    {
        require_argument(!queue.trim().is_empty(), "Queue name cannot be null or empty.")?;
        let producer = self.live_producer()?;
        producer.enqueue(&self.resolve_topic(queue), items).await
    }

    /// Send a single item; `true` when it was buffered
    pub async fn enqueue_one<T>(&self, queue: &str, item: T) -> Result<bool>
    where
        T: Serialize + 'static,
    {
        Ok(self.enqueue(queue, vec![item]).await? == 1)
    }

    /// Read up to `limit` messages from `queue` within `timeout`
    pub async fn dequeue<T>(&self, queue: &str, timeout: Duration, limit: usize) -> Result<Vec<T>>
    where
        T: DeserializeOwned + 'static,
    {
        require_argument(!queue.trim().is_empty(), "Queue name cannot be null or empty.")?;
        require_argument(!timeout.is_zero(), "Timeout must be greater than zero.")?;
        require_argument(limit > 0, "Limit must be greater than zero.")?;
        let consumer = self.live_consumer()?;
        consumer
            .dequeue(&self.resolve_topic(queue), timeout, Some(limit))
            .await
    }

    /// Read a single message, if one arrives within `timeout`
    pub async fn dequeue_one<T>(&self, queue: &str, timeout: Duration) -> Result<Option<T>>
    where
        T: DeserializeOwned + 'static,
    {
        Ok(self.dequeue(queue, timeout, 1).await?.into_iter().next())
    }

    /// Shut down the producer, then the consumer
    ///
    /// Later calls on the service fail with an illegal-state error; disposing twice
    /// is a no-op.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(producer) = &self.producer {
            producer.shutdown().await;
        }
        if let Some(consumer) = &self.consumer {
            match consumer.shutdown().await {
                Ok(drained) => info!(?drained, "Message service disposed"),
                Err(e) => error!(error = %e, "Consumer shutdown failed"),
            }
        }
    }

    /// Whether `dispose` has been called
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for MessageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageService")
            .field("producer", &self.producer.is_some())
            .field("consumer", &self.consumer.is_some())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mq::memory::InMemoryBroker;

    #[test]
    fn test_queue_names_resolve_to_configured_topics() {
        let mut config = QueueConfig::default();
        config.topics.alerts = "prod.alerts".to_string();
        let service = MessageService::new(&config, Arc::new(InMemoryBroker::new())).unwrap();

        assert_eq!(service.resolve_topic(Queue::Alert.name()), "prod.alerts");
        assert_eq!(service.resolve_topic("argusMetricQueue"), "argusMetricQueue");
        assert_eq!(service.resolve_topic("customTopic"), "customTopic");
        assert_eq!(Queue::from_name("argusAnnotationQueue"), Some(Queue::Annotation));
    }

    #[tokio::test]
    async fn test_disabled_sides_are_illegal_state() {
        let mut config = QueueConfig::default();
        config.disable_producer = true;
        config.disable_consumer = true;
        let service = MessageService::new(&config, Arc::new(InMemoryBroker::new())).unwrap();

        let sent = service.enqueue_one("t", "x".to_string()).await;
        assert!(matches!(sent, Err(Error::IllegalState(_))));
        let read = service.dequeue_one::<String>("t", Duration::from_millis(5)).await;
        assert!(matches!(read, Err(Error::IllegalState(_))));
    }

    #[tokio::test]
    async fn test_argument_checks() {
        let service =
            MessageService::new(&QueueConfig::default(), Arc::new(InMemoryBroker::new())).unwrap();
        let timeout = Duration::from_millis(5);

        assert!(matches!(
            service.enqueue_one(" ", "x".to_string()).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            service.dequeue::<String>("t", timeout, 0).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            service.dequeue::<String>("t", Duration::ZERO, 1).await,
            Err(Error::InvalidArgument(_))
        ));
        service.dispose().await;
    }

    #[tokio::test]
    async fn test_disposed_service_rejects_calls() {
        let broker = InMemoryBroker::new();
        let service = MessageService::new(&QueueConfig::default(), Arc::new(broker)).unwrap();
        service.dispose().await;
        service.dispose().await;

        assert!(service.is_disposed());
        let sent = service.enqueue_one("t", "x".to_string()).await;
        assert!(matches!(sent, Err(Error::IllegalState(_))));
    }
}
