//! Configuration management
//!
//! TOML file support, environment variable overrides and defaults for the query
//! engine, the message queue and monitoring.
//!
//! ```toml
//! [query]
//! max_depth = 64
//!
//! [queue.broker]
//! brokers = "localhost:9093"
//!
//! [queue.consumer]
//! group_id = "argus-consumer-unit"
//! streams_per_topic = 2
//! messages_to_buffer = 1000
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mq::broker::ClientProperties;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Query evaluation
    #[serde(default)]
    pub query: QueryConfig,

    /// Message queue
    #[serde(default)]
    pub queue: QueueConfig,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Query evaluation configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Maximum depth of a query tree
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

/// Message queue configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Broker connection and security
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Consumer side
    #[serde(default)]
    pub consumer: ConsumerConfig,

    /// Producer side
    #[serde(default)]
    pub producer: ProducerConfig,

    /// Topic names of the logical queues
    #[serde(default)]
    pub topics: TopicsConfig,

    /// Do not create a producer
    #[serde(default)]
    pub disable_producer: bool,

    /// Do not create a consumer
    #[serde(default)]
    pub disable_consumer: bool,
}

/// Broker connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Comma-separated bootstrap brokers
    #[serde(default = "default_brokers")]
    pub brokers: String,

    /// Security protocol (PLAINTEXT, SSL, ...)
    #[serde(default = "default_security_protocol")]
    pub security_protocol: String,

    /// SSL provider
    #[serde(default)]
    pub ssl_provider: String,

    /// Keystore type
    #[serde(default)]
    pub ssl_keystore_type: String,

    /// Keystore location
    #[serde(default)]
    pub ssl_keystore_location: String,

    /// Keystore password
    #[serde(default)]
    pub ssl_keystore_password: String,

    /// Private key password
    #[serde(default)]
    pub ssl_key_password: String,

    /// Truststore type
    #[serde(default)]
    pub ssl_truststore_type: String,

    /// Truststore location
    #[serde(default)]
    pub ssl_truststore_location: String,

    /// Truststore password
    #[serde(default)]
    pub ssl_truststore_password: String,
}

/// Consumer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsumerConfig {
    /// Consumer group
    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// Offset reset policy
    #[serde(default = "default_offset_reset")]
    pub offset_reset: String,

    /// Workers per topic (at least 2 are started)
    #[serde(default = "default_streams_per_topic")]
    pub streams_per_topic: usize,

    /// Capacity of each topic buffer
    #[serde(default = "default_messages_to_buffer")]
    pub messages_to_buffer: usize,

    /// Abnormal exceptions tolerated per window before a worker stops
    #[serde(default = "default_allowed_exception_count")]
    pub allowed_exception_count: usize,

    /// Length of the exception window in seconds
    #[serde(default = "default_allowed_exception_window_secs")]
    pub allowed_exception_window_secs: u64,

    /// How long shutdown waits for the workers of one topic
    #[serde(default = "default_consumer_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

/// Producer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProducerConfig {
    /// Concurrent sends (at least 10 are allowed)
    #[serde(default = "default_connections")]
    pub connections: usize,

    /// Client-side buffer memory in bytes
    #[serde(default = "default_buffer_memory")]
    pub buffer_memory: u64,

    /// Batch size in bytes
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// How long shutdown waits for in-flight sends
    #[serde(default = "default_producer_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

/// Topic names of the logical queues
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TopicsConfig {
    /// Alert queue
    #[serde(default = "default_alert_topic")]
    pub alerts: String,

    /// Annotation queue
    #[serde(default = "default_annotation_topic")]
    pub annotations: String,

    /// Metric queue
    #[serde(default = "default_metric_topic")]
    pub metrics: String,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable structured logging
    #[serde(default = "default_true")]
    pub structured_logging: bool,
}

// Default value functions
fn default_max_depth() -> usize { 64 }
fn default_brokers() -> String { "localhost:9093".to_string() }
fn default_security_protocol() -> String { "PLAINTEXT".to_string() }
fn default_group_id() -> String { "argus-consumer-unit".to_string() }
fn default_offset_reset() -> String { "earliest".to_string() }
fn default_streams_per_topic() -> usize { 1 }
fn default_messages_to_buffer() -> usize { 1 }
fn default_allowed_exception_count() -> usize { 3 }
fn default_allowed_exception_window_secs() -> u64 { 180 }
fn default_consumer_shutdown_timeout_secs() -> u64 { 60 }
fn default_connections() -> usize { 10 }
fn default_buffer_memory() -> u64 { 134_217_728 }
fn default_batch_size() -> u64 { 102_400 }
fn default_producer_shutdown_timeout_secs() -> u64 { 10 }
fn default_alert_topic() -> String { "argusAlertQueue".to_string() }
fn default_annotation_topic() -> String { "argusAnnotationQueue".to_string() }
fn default_metric_topic() -> String { "argusMetricQueue".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

/// Minimum number of workers started per topic
pub const MIN_STREAMS_PER_TOPIC: usize = 2;
/// Minimum number of concurrent producer sends
pub const MIN_PRODUCER_CONNECTIONS: usize = 10;

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            security_protocol: default_security_protocol(),
            ssl_provider: String::new(),
            ssl_keystore_type: String::new(),
            ssl_keystore_location: String::new(),
            ssl_keystore_password: String::new(),
            ssl_key_password: String::new(),
            ssl_truststore_type: String::new(),
            ssl_truststore_location: String::new(),
            ssl_truststore_password: String::new(),
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: default_group_id(),
            offset_reset: default_offset_reset(),
            streams_per_topic: default_streams_per_topic(),
            messages_to_buffer: default_messages_to_buffer(),
            allowed_exception_count: default_allowed_exception_count(),
            allowed_exception_window_secs: default_allowed_exception_window_secs(),
            shutdown_timeout_secs: default_consumer_shutdown_timeout_secs(),
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            connections: default_connections(),
            buffer_memory: default_buffer_memory(),
            batch_size: default_batch_size(),
            shutdown_timeout_secs: default_producer_shutdown_timeout_secs(),
        }
    }
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            alerts: default_alert_topic(),
            annotations: default_annotation_topic(),
            metrics: default_metric_topic(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: default_log_level(),
            structured_logging: true,
        }
    }
}

impl BrokerConfig {
    /// Connection and security properties shared by consumers and producers
    fn common_properties(&self) -> ClientProperties {
        let mut props = BTreeMap::new();
        props.insert("bootstrap.servers".to_string(), self.brokers.clone());
        props.insert("security.protocol".to_string(), self.security_protocol.clone());

        let ssl = [
            ("ssl.provider", &self.ssl_provider),
            ("ssl.keystore.type", &self.ssl_keystore_type),
            ("ssl.keystore.location", &self.ssl_keystore_location),
            ("ssl.keystore.password", &self.ssl_keystore_password),
            ("ssl.key.password", &self.ssl_key_password),
            ("ssl.truststore.type", &self.ssl_truststore_type),
            ("ssl.truststore.location", &self.ssl_truststore_location),
            ("ssl.truststore.password", &self.ssl_truststore_password),
        ];
        for (key, value) in ssl {
            if !value.is_empty() {
                props.insert(key.to_string(), value.clone());
            }
        }
        props
    }
}

impl ConsumerConfig {
    /// Workers actually started per topic
    pub fn effective_streams(&self) -> usize {
        self.streams_per_topic.max(MIN_STREAMS_PER_TOPIC)
    }

    /// Window of the abnormal-exception circuit breaker
    pub fn exception_window(&self) -> Duration {
        Duration::from_secs(self.allowed_exception_window_secs)
    }

    /// Per-topic worker shutdown timeout
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl ProducerConfig {
    /// Concurrent sends actually allowed
    pub fn effective_connections(&self) -> usize {
        self.connections.max(MIN_PRODUCER_CONNECTIONS)
    }

    /// In-flight send shutdown timeout
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl QueueConfig {
    /// Client properties for a broker consumer
    pub fn consumer_properties(&self) -> ClientProperties {
        let mut props = self.broker.common_properties();
        props.insert("group.id".to_string(), self.consumer.group_id.clone());
        props.insert("auto.offset.reset".to_string(), self.consumer.offset_reset.clone());
        props.insert("key.deserializer".to_string(), "string".to_string());
        props.insert("value.deserializer".to_string(), "string".to_string());
        props
    }

    /// Client properties for a broker producer
    pub fn producer_properties(&self) -> ClientProperties {
        let mut props = self.broker.common_properties();
        props.insert("compression.type".to_string(), "snappy".to_string());
        props.insert("client.id".to_string(), "argus.producer".to_string());
        props.insert("buffer.memory".to_string(), self.producer.buffer_memory.to_string());
        props.insert("batch.size".to_string(), self.producer.batch_size.to_string());
        props.insert("key.serializer".to_string(), "string".to_string());
        props.insert("value.serializer".to_string(), "string".to_string());
        props
    }
}

impl MonitoringConfig {
    /// Install the global tracing subscriber
    ///
    /// `RUST_LOG` takes precedence over `log_level`. Returns an error when a
    /// subscriber is already installed.
    pub fn init_tracing(&self) -> Result<(), String> {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&self.log_level));

        let result = if self.structured_logging {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_names(true)
                .try_init()
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .compact()
                .try_init()
        };
        result.map_err(|e| format!("Failed to install tracing subscriber: {}", e))
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file {}: {}", path, e))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self, String> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Broker
        if let Ok(brokers) = std::env::var("ARGUS_MQ_BROKERS") {
            self.queue.broker.brokers = brokers;
        }

        // Consumer
        if let Ok(group_id) = std::env::var("ARGUS_MQ_GROUP_ID") {
            self.queue.consumer.group_id = group_id;
        }
        if let Ok(streams) = std::env::var("ARGUS_MQ_STREAMS_PER_TOPIC") {
            if let Ok(n) = streams.parse() {
                self.queue.consumer.streams_per_topic = n;
            }
        }
        if let Ok(size) = std::env::var("ARGUS_MQ_BUFFER_SIZE") {
            if let Ok(n) = size.parse() {
                self.queue.consumer.messages_to_buffer = n;
            }
        }

        // Monitoring
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.query.max_depth == 0 {
            return Err("Query max depth must be > 0".to_string());
        }

        if self.queue.broker.brokers.trim().is_empty() {
            return Err("Broker list cannot be empty".to_string());
        }

        let consumer = &self.queue.consumer;
        if consumer.group_id.trim().is_empty() {
            return Err("Consumer group id cannot be empty".to_string());
        }
        if consumer.messages_to_buffer == 0 {
            return Err("Consumer buffer size must be > 0".to_string());
        }
        if consumer.allowed_exception_window_secs == 0 {
            return Err("Allowed exception window must be > 0".to_string());
        }

        let topics = &self.queue.topics;
        for (name, topic) in [
            ("alerts", &topics.alerts),
            ("annotations", &topics.annotations),
            ("metrics", &topics.metrics),
        ] {
            if topic.trim().is_empty() {
                return Err(format!("Topic name for {} cannot be empty", name));
            }
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<(), String> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        std::fs::write(path, contents)
            .map_err(|e| format!("Failed to write config file {}: {}", path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.query.max_depth, 64);
        assert_eq!(config.queue.broker.brokers, "localhost:9093");
        assert_eq!(config.queue.consumer.group_id, "argus-consumer-unit");
        assert_eq!(config.queue.topics.alerts, "argusAlertQueue");
        assert!(config.monitoring.metrics_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_effective_minimums() {
        let config = Config::default();
        assert_eq!(config.queue.consumer.effective_streams(), 2);
        assert_eq!(config.queue.producer.effective_connections(), 10);

        let mut consumer = ConsumerConfig::default();
        consumer.streams_per_topic = 5;
        assert_eq!(consumer.effective_streams(), 5);
    }

    #[test]
    fn test_client_properties() {
        let mut config = QueueConfig::default();
        config.broker.ssl_truststore_location = "/etc/trust.jks".to_string();

        let consumer = config.consumer_properties();
        assert_eq!(consumer["bootstrap.servers"], "localhost:9093");
        assert_eq!(consumer["group.id"], "argus-consumer-unit");
        assert_eq!(consumer["auto.offset.reset"], "earliest");
        assert_eq!(consumer["ssl.truststore.location"], "/etc/trust.jks");
        assert!(!consumer.contains_key("ssl.keystore.location"));

        let producer = config.producer_properties();
        assert_eq!(producer["client.id"], "argus.producer");
        assert_eq!(producer["compression.type"], "snappy");
        assert_eq!(producer["buffer.memory"], "134217728");
    }

    #[test]
    fn test_invalid_buffer_size() {
        let mut config = Config::default();
        config.queue.consumer.messages_to_buffer = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [queue.consumer]
            streams_per_topic = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.queue.consumer.streams_per_topic, 4);
        assert_eq!(config.queue.consumer.offset_reset, "earliest");
        assert_eq!(config.query.max_depth, 64);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("argus.toml");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.queue.topics.metrics = "customMetrics".to_string();
        config.save_to_file(path).unwrap();

        let loaded = Config::from_file(path).unwrap();
        assert_eq!(loaded.queue.topics.metrics, "customMetrics");
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("ARGUS_MQ_BUFFER_SIZE", "250");
        let config = Config::from_env();
        assert_eq!(config.queue.consumer.messages_to_buffer, 250);
        std::env::remove_var("ARGUS_MQ_BUFFER_SIZE");
    }
}
