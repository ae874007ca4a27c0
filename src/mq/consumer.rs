//! Queue consumer
//!
//! Topics are started lazily on first use. Each topic owns a bounded
//! [`TopicBuffer`] fed by several [`ConsumerWorker`] tasks, one broker consumer
//! per worker. Dequeue calls read from the buffer only.
//!
//! # Shutdown
//!
//! Workers are stopped through a watch channel rather than broker wakeups. Once
//! every worker has exited (or timed out and been aborted) the messages still
//! held by the consumer are published back to their topics so nothing read from
//! the broker is lost.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::broker::{
    BrokerClientFactory, BrokerConsumer, ClientProperties, UNBOUNDED_POLL_TIMEOUT,
};
use super::buffer::TopicBuffer;
use super::error::{BrokerError, QueueError};
use super::exception_log::ExceptionLog;
use super::producer::QueueProducer;
use crate::config::{ConsumerConfig, QueueConfig};
use crate::error::{require_argument, require_state, Error, Result};
use crate::metrics;

// =============================================================================
// Interrupt
// =============================================================================

/// Caller-side cancellation for [`QueueConsumer::dequeue_with_interrupt`]
///
/// Once raised it stays raised; clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    inner: Arc<InterruptInner>,
}

#[derive(Debug, Default)]
struct InterruptInner {
    raised: AtomicBool,
    notify: Notify,
}

impl Interrupt {
    /// New, not raised
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the interrupt and wake every waiter
    pub fn interrupt(&self) {
        self.inner.raised.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Whether the interrupt has been raised
    pub fn is_interrupted(&self) -> bool {
        self.inner.raised.load(Ordering::Acquire)
    }

    /// Resolve once the interrupt is raised
    pub async fn interrupted(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_interrupted() {
                return;
            }
            notified.await;
        }
    }
}

// =============================================================================
// Consumer worker
// =============================================================================

/// Lifecycle of a consumer worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Polling the broker
    Running,
    /// Stopped by shutdown or by the circuit breaker; terminal
    Closed,
}

enum StopReason {
    Shutdown,
    CircuitBreaker,
}

/// Moves records from one broker consumer into a topic buffer
pub struct ConsumerWorker {
    name: String,
    topic: String,
    properties: ClientProperties,
    factory: Arc<dyn BrokerClientFactory>,
    buffer: Arc<TopicBuffer>,
    exceptions: ExceptionLog,
    allowed_exceptions: usize,
    closed: AtomicBool,
    /// Values polled but not buffered when the worker was stopped
    stranded: Mutex<Vec<String>>,
}

impl ConsumerWorker {
    /// Create worker `index` of `topic`
    pub fn new(
        index: usize,
        buffer: Arc<TopicBuffer>,
        properties: ClientProperties,
        factory: Arc<dyn BrokerClientFactory>,
        config: &ConsumerConfig,
    ) -> Self {
        let topic = buffer.topic().to_string();
        Self {
            name: format!("{}-consumerworker-{}", topic, index),
            topic,
            properties,
            factory,
            buffer,
            exceptions: ExceptionLog::new(config.exception_window()),
            allowed_exceptions: config.allowed_exception_count,
            closed: AtomicBool::new(false),
            stranded: Mutex::new(Vec::new()),
        }
    }

    /// Worker name, `{topic}-consumerworker-{index}`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the worker to stop at its next check
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether the worker has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Current state
    pub fn state(&self) -> WorkerState {
        if self.is_closed() {
            WorkerState::Closed
        } else {
            WorkerState::Running
        }
    }

    /// Abnormal exceptions inside the current window
    pub fn exception_count(&self) -> usize {
        self.exceptions.len()
    }

    /// Take the values that were polled but never buffered
    pub fn take_stranded(&self) -> Vec<String> {
        std::mem::take(&mut *self.stranded.lock())
    }

    /// Run until shutdown, the circuit breaker trips, or an unrecoverable error
    pub async fn run(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> std::result::Result<(), QueueError> {
        let span = info_span!("consumer_worker", name = %self.name);
        async move {
            metrics::record_worker_started();
            info!(topic = %self.topic, "Consumer worker started");

            let outcome = self.consume(&mut shutdown).await;
            self.close();

            match &outcome {
                Ok(StopReason::Shutdown) => {
                    info!("Consumer worker stopped");
                    metrics::record_worker_stopped("shutdown");
                }
                Ok(StopReason::CircuitBreaker) => {
                    error!(
                        exceptions = self.exceptions.len(),
                        allowed = self.allowed_exceptions,
                        recent = ?self.exceptions.recent(),
                        "Too many consumer exceptions, worker stopped"
                    );
                    metrics::record_worker_stopped("circuit_breaker");
                }
                Err(e) => {
                    error!(error = %e, "Consumer worker failed");
                    metrics::record_worker_stopped("error");
                }
            }
            outcome.map(|_| ())
        }
        .instrument(span)
        .await
    }

    fn should_stop(&self, shutdown: &watch::Receiver<bool>) -> bool {
        self.is_closed() || *shutdown.borrow()
    }

    async fn consume(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> std::result::Result<StopReason, QueueError> {
        loop {
            if self.should_stop(shutdown) {
                return Ok(StopReason::Shutdown);
            }
            if self.exceptions.exceeds(self.allowed_exceptions) {
                return Ok(StopReason::CircuitBreaker);
            }

            let mut consumer = match self.factory.create_consumer(&self.properties) {
                Ok(consumer) => consumer,
                Err(e) => {
                    self.record_exception(&e);
                    continue;
                }
            };

            let outcome = self.poll_loop(consumer.as_mut(), shutdown).await;
            consumer.close().await;

            match outcome {
                Ok(()) => return Ok(StopReason::Shutdown),
                Err(BrokerError::Wakeup) if self.is_closed() => {
                    return Ok(StopReason::Shutdown);
                }
                Err(BrokerError::Wakeup) => {
                    return Err(QueueError::Worker {
                        name: self.name.clone(),
                        reason: "woken up while running".to_string(),
                    });
                }
                Err(e) => self.record_exception(&e),
            }
        }
    }

    fn record_exception(&self, e: &BrokerError) {
        warn!(topic = %self.topic, error = %e, "Consumer exception, reconnecting");
        self.exceptions.record(e.to_string());
        metrics::record_consumer_exception(&self.topic);
    }

    /// Returns `Ok` only when asked to stop
    async fn poll_loop(
        &self,
        consumer: &mut dyn BrokerConsumer,
        shutdown: &mut watch::Receiver<bool>,
    ) -> std::result::Result<(), BrokerError> {
        consumer.subscribe(&[self.topic.clone()]).await?;

        loop {
            if self.should_stop(shutdown) {
                return Ok(());
            }

            let polled = tokio::select! {
                biased;
                _ = shutdown.changed() => return Ok(()),
                polled = consumer.poll(UNBOUNDED_POLL_TIMEOUT) => polled,
            };

            let records = match polled {
                Ok(records) => records,
                Err(e) if e.is_retryable() => {
                    debug!(error = %e, "Retryable poll error");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mut values: VecDeque<String> =
                records.into_iter().filter_map(|record| record.value).collect();
            while let Some(value) = values.pop_front() {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        self.strand(value, values);
                        return Ok(());
                    }
                    permit = self.buffer.reserve() => match permit {
                        Ok(permit) => permit.send(value),
                        Err(_) => {
                            self.strand(value, values);
                            return Ok(());
                        }
                    }
                }
            }

            match consumer.commit().await {
                Ok(()) => {}
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "Offset commit failed, continuing");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn strand(&self, value: String, rest: VecDeque<String>) {
        let mut stranded = self.stranded.lock();
        stranded.push(value);
        stranded.extend(rest);
    }
}

impl std::fmt::Debug for ConsumerWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerWorker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Queue consumer
// =============================================================================

struct Topic {
    buffer: Arc<TopicBuffer>,
    workers: Vec<Arc<ConsumerWorker>>,
    handles: Mutex<Vec<JoinHandle<std::result::Result<(), QueueError>>>>,
}

/// Buffered consumer over any number of topics
pub struct QueueConsumer {
    config: QueueConfig,
    factory: Arc<dyn BrokerClientFactory>,
    topics: DashMap<String, Arc<Topic>>,
    shutdown_tx: watch::Sender<bool>,
    closed: AtomicBool,
}

impl QueueConsumer {
    /// Create a consumer; no topic is started until it is first used
    pub fn new(config: &QueueConfig, factory: Arc<dyn BrokerClientFactory>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config: config.clone(),
            factory,
            topics: DashMap::new(),
            shutdown_tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Start the buffer and workers of `topic` unless already running
    ///
    /// Must be called from within a Tokio runtime.
    pub fn initialize_topic(&self, topic: &str) -> Result<()> {
        require_argument(!topic.trim().is_empty(), "Topic cannot be null or empty.")?;
        require_state(!self.is_shut_down(), "Consumer has been shut down.")?;

        if self.topics.contains_key(topic) {
            return Ok(());
        }
        let runtime = Handle::try_current().map_err(|_| {
            Error::IllegalState("Consumer workers require a Tokio runtime.".to_string())
        })?;

        if let Entry::Vacant(slot) = self.topics.entry(topic.to_string()) {
            slot.insert(Arc::new(self.start_topic(topic, &runtime)));
        }
        Ok(())
    }

    fn start_topic(&self, topic: &str, runtime: &Handle) -> Topic {
        let consumer = &self.config.consumer;
        let streams = consumer.effective_streams();
        let buffer = Arc::new(TopicBuffer::new(topic, consumer.messages_to_buffer));
        let properties = self.config.consumer_properties();

        let workers: Vec<_> = (0..streams)
            .map(|index| {
                Arc::new(ConsumerWorker::new(
                    index,
                    buffer.clone(),
                    properties.clone(),
                    self.factory.clone(),
                    consumer,
                ))
            })
            .collect();
        let handles = workers
            .iter()
            .map(|worker| runtime.spawn(worker.clone().run(self.shutdown_tx.subscribe())))
            .collect();

        info!(
            topic = %topic,
            streams,
            buffer_capacity = buffer.capacity(),
            "Topic consumer initialized"
        );
        Topic {
            buffer,
            workers,
            handles: Mutex::new(handles),
        }
    }

    /// Buffer of an initialized topic
    pub fn buffer(&self, topic: &str) -> Option<Arc<TopicBuffer>> {
        self.topics.get(topic).map(|t| t.buffer.clone())
    }

    /// States of the workers of an initialized topic
    pub fn worker_states(&self, topic: &str) -> Vec<WorkerState> {
        self.topics
            .get(topic)
            .map(|t| t.workers.iter().map(|w| w.state()).collect())
            .unwrap_or_default()
    }

    /// Read up to `limit` messages from `topic`, waiting at most `timeout` in total
    pub async fn dequeue<T>(
        &self,
        topic: &str,
        timeout: Duration,
        limit: Option<usize>,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned + 'static,
    {
        self.dequeue_with_interrupt(topic, timeout, limit, &Interrupt::new())
            .await
    }

    /// Like [`dequeue`](Self::dequeue), returning early once `interrupt` is raised
    pub async fn dequeue_with_interrupt<T>(
        &self,
        topic: &str,
        timeout: Duration,
        limit: Option<usize>,
        interrupt: &Interrupt,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned + 'static,
    {
        require_argument(!topic.trim().is_empty(), "Topic cannot be null or empty.")?;
        require_argument(!timeout.is_zero(), "Timeout must be greater than zero.")?;
        require_argument(limit != Some(0), "Limit must be greater than zero.")?;
        self.initialize_topic(topic)?;
        let buffer = self.buffer(topic).ok_or_else(|| {
            Error::IllegalState(format!("Topic '{}' is not initialized.", topic))
        })?;

        let deadline = Instant::now() + timeout;
        let mut messages = Vec::new();
        while limit.map_or(true, |limit| messages.len() < limit) {
            let now = Instant::now();
            if interrupt.is_interrupted() || now >= deadline {
                break;
            }

            let polled = tokio::select! {
                biased;
                _ = interrupt.interrupted() => break,
                polled = buffer.poll(deadline - now) => polled,
            };
            let Some(payload) = polled else {
                break;
            };
            if payload.is_empty() {
                continue;
            }

            match decode::<T>(payload) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Failed to deserialize message, dropping");
                    metrics::record_dropped(topic);
                }
            }
        }

        metrics::record_dequeued(topic, messages.len());
        debug!(topic = %topic, count = messages.len(), "Dequeued messages");
        Ok(messages)
    }

    /// Messages read from the broker that no dequeue has taken yet
    pub fn undrained(&self) -> usize {
        self.topics
            .iter()
            .map(|topic| {
                let stranded: usize = topic.workers.iter().map(|w| w.stranded.lock().len()).sum();
                topic.buffer.len() + stranded
            })
            .sum()
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop every worker and publish unread messages back to their topics
    ///
    /// Returns the number of messages re-submitted per topic.
    pub async fn shutdown(&self) -> Result<HashMap<String, usize>> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::IllegalState(
                "Consumer has already been shut down.".to_string(),
            ));
        }

        let topics: Vec<(String, Arc<Topic>)> = self
            .topics
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        info!(topics = topics.len(), "Shutting down queue consumer");

        for (_, topic) in &topics {
            topic.workers.iter().for_each(|worker| worker.close());
        }
        self.shutdown_tx.send_replace(true);

        let timeout = self.config.consumer.shutdown_timeout();
        for (name, topic) in &topics {
            let deadline = Instant::now() + timeout;
            let handles = std::mem::take(&mut *topic.handles.lock());
            for mut handle in handles {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match tokio::time::timeout(remaining, &mut handle).await {
                    Ok(Ok(Ok(()))) => {
                        debug!(topic = %name, "Consumer worker exited");
                    }
                    Ok(Ok(Err(e))) => {
                        warn!(topic = %name, error = %e, "Consumer worker exited with error");
                    }
                    Ok(Err(e)) => {
                        error!(topic = %name, error = %e, "Consumer worker panicked");
                    }
                    Err(_) => {
                        warn!(
                            topic = %name,
                            timeout_secs = timeout.as_secs(),
                            "Consumer worker did not stop in time, aborting"
                        );
                        handle.abort();
                    }
                }
            }
        }

        let drained = self.drain(&topics).await;
        self.topics.clear();
        info!("Queue consumer shut down");
        Ok(drained)
    }

    async fn drain(&self, topics: &[(String, Arc<Topic>)]) -> HashMap<String, usize> {
        let mut drained = HashMap::new();
        let mut pending = Vec::new();
        for (name, topic) in topics {
            let mut messages = topic.buffer.drain().await;
            for worker in &topic.workers {
                messages.extend(worker.take_stranded());
            }
            if !messages.is_empty() {
                pending.push((name, messages));
            }
        }
        if pending.is_empty() {
            return drained;
        }

        let producer = match QueueProducer::new(&self.config, self.factory.clone()) {
            Ok(producer) => producer,
            Err(e) => {
                let lost: usize = pending.iter().map(|(_, m)| m.len()).sum();
                error!(error = %e, lost, "Could not create producer to drain buffers");
                return drained;
            }
        };

        for (name, messages) in pending {
            let count = messages.len();
            info!(topic = %name, count, "Re-submitting buffered messages");
            match producer.enqueue(name, messages).await {
                Ok(sent) => {
                    if sent < count {
                        warn!(
                            topic = %name,
                            sent,
                            count,
                            "Some buffered messages were not re-submitted"
                        );
                    }
                    metrics::record_drained(name, sent);
                    drained.insert(name.clone(), sent);
                }
                Err(e) => {
                    error!(topic = %name, count, error = %e, "Failed to re-submit buffered messages");
                }
            }
        }
        producer.shutdown().await;
        drained
    }
}

impl std::fmt::Debug for QueueConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("topics", &self.topics.len())
            .field("closed", &self.is_shut_down())
            .finish()
    }
}

impl Drop for QueueConsumer {
    fn drop(&mut self) {
        if self.is_shut_down() || self.topics.is_empty() {
            return;
        }
        let undrained = self.undrained();
        for topic in self.topics.iter() {
            topic.workers.iter().for_each(|worker| worker.close());
        }
        self.shutdown_tx.send_replace(true);
        if undrained > 0 {
            warn!(
                undrained,
                topics = self.topics.len(),
                "Queue consumer dropped without shutdown, buffered messages are lost"
            );
        }
    }
}

/// Decode `payload`: `String` targets get the raw text, everything else is JSON
fn decode<T: DeserializeOwned + 'static>(payload: String) -> serde_json::Result<T> {
    let mut raw: Option<T> = None;
    if let Some(slot) = (&mut raw as &mut dyn Any).downcast_mut::<Option<String>>() {
        *slot = Some(payload);
    } else {
        return serde_json::from_str(&payload);
    }
    raw.ok_or_else(|| <serde_json::Error as serde::de::Error>::custom("empty raw payload"))
}
