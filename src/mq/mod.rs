//! Buffered message queue
//!
//! # Architecture
//!
//! ```text
//! broker ──► ConsumerWorker ×N ──► TopicBuffer ──► QueueConsumer::dequeue
//!                                                     │
//! QueueProducer::enqueue ──► semaphore-bounded sends ──► broker
//! ```
//!
//! The broker itself sits behind [`BrokerClientFactory`]; [`InMemoryBroker`] is
//! the in-process implementation used for tests and local runs.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use argus_core::config::QueueConfig;
//! use argus_core::mq::{InMemoryBroker, MessageService, Queue};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let broker = InMemoryBroker::new();
//! let service = MessageService::new(&QueueConfig::default(), Arc::new(broker)).unwrap();
//!
//! service.enqueue_one(Queue::Alert.name(), "disk full".to_string()).await.unwrap();
//! let alert: Option<String> = service
//!     .dequeue_one(Queue::Alert.name(), Duration::from_secs(5))
//!     .await
//!     .unwrap();
//! assert_eq!(alert.as_deref(), Some("disk full"));
//!
//! service.dispose().await;
//! # });
//! ```

pub mod broker;
pub mod buffer;
pub mod consumer;
pub mod error;
pub mod exception_log;
pub mod memory;
pub mod producer;
pub mod service;

pub use broker::{
    BrokerClientFactory, BrokerConsumer, BrokerProducer, ClientProperties, ConsumerRecord,
    DeliveryReceipt, RecordMetadata,
};
pub use buffer::{BufferSlot, TopicBuffer};
pub use consumer::{ConsumerWorker, Interrupt, QueueConsumer, WorkerState};
pub use error::{BrokerError, QueueError};
pub use exception_log::ExceptionLog;
pub use memory::InMemoryBroker;
pub use producer::QueueProducer;
pub use service::{MessageService, Queue};
