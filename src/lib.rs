//! Argus core - metric query evaluation and buffered message queueing
//!
//! This library provides the two engines behind the monitoring service:
//! - Query evaluation over a tree of transforms and leaf metric queries, with
//!   wildcard discovery, batched storage fetches and merged query statistics
//! - A buffered message queue with lazily started per-topic consumer workers,
//!   a circuit breaker, a bounded-concurrency producer and drain-back on shutdown

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Query evaluation engine
/// Evaluates query trees against discovery and storage collaborators
pub mod query;

/// Buffered message queue
/// Provides topic consumers, a bounded producer and the message service facade
pub mod mq;

// Re-export main types
pub use config::Config;
pub use error::{Error, Result};
pub use mq::{MessageService, Queue, QueueConsumer, QueueProducer};
pub use query::{MetricQueryResult, QueryContext, QueryProcessor, QueryTree};
pub use types::{Aggregator, Metric, MetricQuery, Timestamp};
