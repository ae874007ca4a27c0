//! Metrics and telemetry
//!
//! Prometheus metrics for query evaluation and the message queue.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};

lazy_static! {
    // === Query Evaluation ===

    /// Transforms applied, by transform name
    pub static ref TRANSFORMS_EVALUATED: CounterVec = register_counter_vec!(
        "argus_transforms_evaluated_total",
        "Total transforms applied by name",
        &["transform"]
    ).unwrap();

    /// Leaf queries evaluated
    pub static ref LEAF_QUERIES_TOTAL: Counter = register_counter!(
        "argus_leaf_query_total",
        "Total leaf time-series queries evaluated"
    ).unwrap();

    /// Leaf query duration
    pub static ref LEAF_QUERY_DURATION: Histogram = register_histogram!(
        "argus_leaf_query_duration_seconds",
        "Leaf query latency in seconds (discovery + fetch)",
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    /// Leaf queries expanded by discovery
    pub static ref DISCOVERY_EXPANSIONS: Counter = register_counter!(
        "argus_discovery_expansions_total",
        "Total leaf queries expanded by discovery"
    ).unwrap();

    /// Concrete queries produced by discovery
    pub static ref DISCOVERY_RESULTS: Counter = register_counter!(
        "argus_discovery_results_total",
        "Total concrete queries produced by discovery"
    ).unwrap();

    // === Message Queue ===

    /// Messages handed to callers by dequeue
    pub static ref MQ_DEQUEUED: CounterVec = register_counter_vec!(
        "argus_mq_dequeued_total",
        "Total messages dequeued by topic",
        &["topic"]
    ).unwrap();

    /// Messages dropped because they could not be deserialized
    pub static ref MQ_DROPPED: CounterVec = register_counter_vec!(
        "argus_mq_dropped_total",
        "Total messages dropped on deserialization failure by topic",
        &["topic"]
    ).unwrap();

    /// Producer outcomes (buffered, skipped, failed)
    pub static ref MQ_ENQUEUED: CounterVec = register_counter_vec!(
        "argus_mq_enqueued_total",
        "Total messages submitted to the producer by outcome",
        &["status"]
    ).unwrap();

    /// Abnormal consumer exceptions
    pub static ref MQ_CONSUMER_EXCEPTIONS: CounterVec = register_counter_vec!(
        "argus_mq_consumer_exceptions_total",
        "Total abnormal consumer exceptions by topic",
        &["topic"]
    ).unwrap();

    /// Consumer workers stopped
    pub static ref MQ_WORKERS_STOPPED: CounterVec = register_counter_vec!(
        "argus_mq_workers_stopped_total",
        "Total consumer workers stopped by reason",
        &["reason"]
    ).unwrap();

    /// Messages re-published on shutdown
    pub static ref MQ_DRAINED: CounterVec = register_counter_vec!(
        "argus_mq_drained_total",
        "Total buffered messages re-published on shutdown by topic",
        &["topic"]
    ).unwrap();

    /// Running consumer workers
    pub static ref MQ_ACTIVE_WORKERS: Gauge = register_gauge!(
        "argus_mq_active_workers",
        "Number of running consumer workers"
    ).unwrap();
}

/// Initialize metrics system
pub fn init() {
    lazy_static::initialize(&TRANSFORMS_EVALUATED);
    lazy_static::initialize(&LEAF_QUERIES_TOTAL);
    lazy_static::initialize(&LEAF_QUERY_DURATION);
    lazy_static::initialize(&MQ_ACTIVE_WORKERS);

    tracing::info!("Metrics system initialized");
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record an applied transform
#[inline]
pub fn record_transform_evaluated(transform: &str) {
    TRANSFORMS_EVALUATED.with_label_values(&[transform]).inc();
}

/// Record a finished leaf query
#[inline]
pub fn record_leaf_query(duration_secs: f64) {
    LEAF_QUERIES_TOTAL.inc();
    LEAF_QUERY_DURATION.observe(duration_secs);
}

/// Record a discovery expansion into `results` concrete queries
#[inline]
pub fn record_discovery_expansion(results: usize) {
    DISCOVERY_EXPANSIONS.inc();
    DISCOVERY_RESULTS.inc_by(results as f64);
}

/// Record messages handed out by dequeue
#[inline]
pub fn record_dequeued(topic: &str, count: usize) {
    if count > 0 {
        MQ_DEQUEUED.with_label_values(&[topic]).inc_by(count as f64);
    }
}

/// Record a message dropped on deserialization failure
#[inline]
pub fn record_dropped(topic: &str) {
    MQ_DROPPED.with_label_values(&[topic]).inc();
}

/// Record a producer outcome (`buffered`, `skipped` or `failed`)
#[inline]
pub fn record_enqueue(status: &str) {
    MQ_ENQUEUED.with_label_values(&[status]).inc();
}

/// Record an abnormal consumer exception
#[inline]
pub fn record_consumer_exception(topic: &str) {
    MQ_CONSUMER_EXCEPTIONS.with_label_values(&[topic]).inc();
}

/// Record a worker start
#[inline]
pub fn record_worker_started() {
    MQ_ACTIVE_WORKERS.inc();
}

/// Record a worker stop (`shutdown`, `circuit_breaker` or `error`)
#[inline]
pub fn record_worker_stopped(reason: &str) {
    MQ_WORKERS_STOPPED.with_label_values(&[reason]).inc();
    MQ_ACTIVE_WORKERS.dec();
}

/// Record messages re-published on shutdown
#[inline]
pub fn record_drained(topic: &str, count: usize) {
    MQ_DRAINED.with_label_values(&[topic]).inc_by(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_transform() {
        record_transform_evaluated("SUM");
        let metrics = gather_metrics().expect("Failed to gather metrics");
        assert!(metrics.contains("argus_transforms_evaluated_total"));
    }

    #[test]
    fn test_record_queue_metrics() {
        init();
        record_enqueue("buffered");
        record_dequeued("metrics-test-topic", 3);
        let metrics = gather_metrics().expect("Failed to gather metrics");
        assert!(metrics.contains("argus_mq_enqueued_total"));
        assert!(metrics.contains("metrics-test-topic"));
    }
}
