//! In-process broker
//!
//! [`InMemoryBroker`] implements [`BrokerClientFactory`] with one append-only log
//! per topic and per-group read offsets, so several consumers in the same group
//! share the work of a topic. It is intended for:
//! - **Unit and integration testing** without a broker
//! - **Local development** of producers and consumers
//!
//! Faults can be injected to exercise error paths: queued poll errors are
//! returned by the next poll of any consumer, queued send errors by the next send.
//!
//! # Warning
//!
//! Data lives only as long as the broker value; there is no persistence and a
//! single partition per topic.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::broker::{
    BrokerClientFactory, BrokerConsumer, BrokerProducer, ClientProperties, ConsumerRecord,
    DeliveryReceipt, RecordMetadata, UNBOUNDED_POLL_TIMEOUT,
};
use super::error::BrokerError;

const DEFAULT_GROUP: &str = "default";
const MAX_POLL_RECORDS: usize = 500;
const POLL_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct BrokerState {
    logs: HashMap<String, Vec<String>>,
    /// (group, topic) -> next offset to hand out
    offsets: HashMap<(String, String), usize>,
    /// (group, topic) -> committed offset
    committed: HashMap<(String, String), usize>,
    poll_errors: VecDeque<BrokerError>,
    commit_errors: VecDeque<BrokerError>,
    send_errors: VecDeque<BrokerError>,
    delivery_errors: VecDeque<BrokerError>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<BrokerState>,
    appended: Notify,
    consumers_created: AtomicU64,
    producers_created: AtomicU64,
}

/// In-process broker shared by every client it creates
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    /// Empty broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `payload` to `topic` directly
    pub fn publish(&self, topic: &str, payload: impl Into<String>) -> i64 {
        let offset = {
            let mut state = self.inner.state.lock();
            let log = state.logs.entry(topic.to_string()).or_default();
            log.push(payload.into());
            (log.len() - 1) as i64
        };
        self.inner.appended.notify_waiters();
        offset
    }

    /// Every payload appended to `topic`, in order
    pub fn messages(&self, topic: &str) -> Vec<String> {
        self.inner
            .state
            .lock()
            .logs
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Records of `topic` not yet handed to any consumer of `group`
    pub fn pending(&self, group: &str, topic: &str) -> usize {
        let state = self.inner.state.lock();
        let len = state.logs.get(topic).map(Vec::len).unwrap_or(0);
        let read = state
            .offsets
            .get(&(group.to_string(), topic.to_string()))
            .copied()
            .unwrap_or(0);
        len.saturating_sub(read)
    }

    /// Committed offset of `group` on `topic`
    pub fn committed(&self, group: &str, topic: &str) -> usize {
        self.inner
            .state
            .lock()
            .committed
            .get(&(group.to_string(), topic.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Make the next poll of any consumer fail with `error`
    pub fn inject_poll_error(&self, error: BrokerError) {
        self.inner.state.lock().poll_errors.push_back(error);
        self.inner.appended.notify_waiters();
    }

    /// Make the next commit of any consumer fail with `error`
    pub fn inject_commit_error(&self, error: BrokerError) {
        self.inner.state.lock().commit_errors.push_back(error);
    }

    /// Make the next send of any producer fail with `error`
    pub fn inject_send_error(&self, error: BrokerError) {
        self.inner.state.lock().send_errors.push_back(error);
    }

    /// Make the delivery of the next accepted send fail with `error`
    pub fn inject_delivery_error(&self, error: BrokerError) {
        self.inner.state.lock().delivery_errors.push_back(error);
    }

    /// Consumers created so far
    pub fn consumers_created(&self) -> u64 {
        self.inner.consumers_created.load(Ordering::Relaxed)
    }

    /// Producers created so far
    pub fn producers_created(&self) -> u64 {
        self.inner.producers_created.load(Ordering::Relaxed)
    }
}

impl BrokerClientFactory for InMemoryBroker {
    fn create_consumer(
        &self,
        properties: &ClientProperties,
    ) -> Result<Box<dyn BrokerConsumer>, BrokerError> {
        self.inner.consumers_created.fetch_add(1, Ordering::Relaxed);
        let group = properties
            .get("group.id")
            .cloned()
            .unwrap_or_else(|| DEFAULT_GROUP.to_string());
        Ok(Box::new(MemoryConsumer {
            inner: self.inner.clone(),
            group,
            topics: Vec::new(),
            delivered: HashMap::new(),
            closed: false,
        }))
    }

    fn create_producer(
        &self,
        _properties: &ClientProperties,
    ) -> Result<Arc<dyn BrokerProducer>, BrokerError> {
        self.inner.producers_created.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(MemoryProducer {
            inner: self.inner.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

// =============================================================================
// Consumer
// =============================================================================

struct MemoryConsumer {
    inner: Arc<Inner>,
    group: String,
    topics: Vec<String>,
    /// topic -> offset after the last record returned by this consumer
    delivered: HashMap<String, usize>,
    closed: bool,
}

impl MemoryConsumer {
    fn try_fetch(&mut self) -> Result<Vec<ConsumerRecord>, BrokerError> {
        let mut state = self.inner.state.lock();
        if let Some(error) = state.poll_errors.pop_front() {
            return Err(error);
        }

        let mut records = Vec::new();
        for topic in &self.topics {
            let key = (self.group.clone(), topic.clone());
            let start = state.offsets.get(&key).copied().unwrap_or(0);
            let Some(log) = state.logs.get(topic) else {
                continue;
            };
            let end = log.len().min(start + MAX_POLL_RECORDS - records.len());
            for (i, value) in log[start..end].iter().enumerate() {
                records.push(ConsumerRecord {
                    topic: topic.clone(),
                    partition: 0,
                    offset: (start + i) as i64,
                    value: Some(value.clone()),
                });
            }
            if end > start {
                state.offsets.insert(key, end);
                self.delivered.insert(topic.clone(), end);
            }
            if records.len() >= MAX_POLL_RECORDS {
                break;
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl BrokerConsumer for MemoryConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Other("consumer is closed".to_string()));
        }
        self.topics = topics.to_vec();
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<ConsumerRecord>, BrokerError> {
        if self.closed {
            return Err(BrokerError::Other("consumer is closed".to_string()));
        }
        let deadline = Instant::now() + timeout.min(UNBOUNDED_POLL_TIMEOUT);
        let inner = self.inner.clone();
        loop {
            let notified = inner.appended.notified();
            let records = self.try_fetch()?;
            if !records.is_empty() {
                return Ok(records);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            // Wake on append, re-check periodically for anything missed.
            let _ = tokio::time::timeout((deadline - now).min(POLL_SLICE), notified).await;
        }
    }

    async fn commit(&mut self) -> Result<(), BrokerError> {
        let mut state = self.inner.state.lock();
        if let Some(error) = state.commit_errors.pop_front() {
            return Err(error);
        }
        for (topic, offset) in &self.delivered {
            let key = (self.group.clone(), topic.clone());
            let committed = state.committed.entry(key).or_insert(0);
            *committed = (*committed).max(*offset);
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

// =============================================================================
// Producer
// =============================================================================

struct MemoryProducer {
    inner: Arc<Inner>,
    closed: AtomicBool,
}

#[async_trait]
impl BrokerProducer for MemoryProducer {
    async fn send(&self, topic: &str, payload: String) -> Result<DeliveryReceipt, BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Other("producer is closed".to_string()));
        }
        let result = {
            let mut state = self.inner.state.lock();
            if let Some(error) = state.send_errors.pop_front() {
                return Err(error);
            }
            match state.delivery_errors.pop_front() {
                Some(error) => Err(error),
                None => {
                    let log = state.logs.entry(topic.to_string()).or_default();
                    log.push(payload);
                    Ok(RecordMetadata {
                        topic: topic.to_string(),
                        partition: 0,
                        offset: (log.len() - 1) as i64,
                    })
                }
            }
        };
        if result.is_ok() {
            self.inner.appended.notify_waiters();
        }
        Ok(DeliveryReceipt::completed(result))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(group: &str) -> ClientProperties {
        let mut props = ClientProperties::new();
        props.insert("group.id".to_string(), group.to_string());
        props
    }

    #[tokio::test]
    async fn test_publish_and_poll() {
        let broker = InMemoryBroker::new();
        broker.publish("t", "a");
        broker.publish("t", "b");

        let mut consumer = broker.create_consumer(&props("g")).unwrap();
        consumer.subscribe(&["t".to_string()]).await.unwrap();
        let records = consumer.poll(Duration::from_millis(10)).await.unwrap();
        let values: Vec<_> = records.into_iter().filter_map(|r| r.value).collect();
        assert_eq!(values, vec!["a", "b"]);
        assert_eq!(broker.pending("g", "t"), 0);

        consumer.commit().await.unwrap();
        assert_eq!(broker.committed("g", "t"), 2);
    }

    #[tokio::test]
    async fn test_group_members_share_offsets() {
        let broker = InMemoryBroker::new();
        broker.publish("t", "a");

        let mut first = broker.create_consumer(&props("g")).unwrap();
        let mut second = broker.create_consumer(&props("g")).unwrap();
        first.subscribe(&["t".to_string()]).await.unwrap();
        second.subscribe(&["t".to_string()]).await.unwrap();

        assert_eq!(first.poll(Duration::from_millis(10)).await.unwrap().len(), 1);
        assert!(second.poll(Duration::from_millis(10)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_poll_wakes_on_publish() {
        let broker = InMemoryBroker::new();
        let mut consumer = broker.create_consumer(&props("g")).unwrap();
        consumer.subscribe(&["t".to_string()]).await.unwrap();

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("t", "late");
        });

        let records = consumer.poll(Duration::from_secs(5)).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_errors() {
        let broker = InMemoryBroker::new();
        broker.inject_poll_error(BrokerError::Connection("reset".to_string()));
        broker.inject_send_error(BrokerError::BufferExhausted);

        let mut consumer = broker.create_consumer(&props("g")).unwrap();
        consumer.subscribe(&["t".to_string()]).await.unwrap();
        assert!(matches!(
            consumer.poll(Duration::from_millis(10)).await,
            Err(BrokerError::Connection(_))
        ));

        let producer = broker.create_producer(&ClientProperties::new()).unwrap();
        assert!(matches!(
            producer.send("t", "x".to_string()).await,
            Err(BrokerError::BufferExhausted)
        ));
        let receipt = producer.send("t", "y".to_string()).await.unwrap();
        assert_eq!(receipt.wait().await.unwrap().offset, 0);
        assert_eq!(broker.messages("t"), vec!["y"]);
    }

    #[tokio::test]
    async fn test_closed_producer_rejects_sends() {
        let broker = InMemoryBroker::new();
        let producer = broker.create_producer(&ClientProperties::new()).unwrap();
        producer.close().await;
        assert!(producer.send("t", "x".to_string()).await.is_err());
    }
}
