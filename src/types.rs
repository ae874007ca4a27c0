//! Core data types shared by the query engine and its collaborators
//!
//! # Key Types
//!
//! - **`Metric`**: A single time series (identity + `timestamp -> value` datapoints)
//! - **`Aggregator`**: Aggregation applied when combining series or downsampling
//! - **`MetricQuery`**: A concrete time-series query handed to discovery and storage
//!
//! # Example
//!
//! ```rust
//! use argus_core::types::{Aggregator, Metric, MetricQuery};
//!
//! let mut metric = Metric::new("system.host1", "cpu.user");
//! metric.add_tag("dc", "us-east");
//! metric.add_datapoint(1_000, 42.5);
//!
//! let query = MetricQuery::new("system.host1", "cpu.user", 0, 60_000)
//!     .with_aggregator(Aggregator::Avg);
//! assert!(metric.matches_identity(&query));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Timestamp in milliseconds since the Unix epoch
pub type Timestamp = i64;

// ============================================================================
// Metric
// ============================================================================

/// A time series identified by scope, metric name, tags and namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Scope (usually the system or service that emitted the series)
    pub scope: String,
    /// Metric name
    pub metric: String,
    /// Tags identifying the series within scope/metric
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Optional namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Optional units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    /// Datapoints sorted by timestamp
    #[serde(default)]
    pub datapoints: BTreeMap<Timestamp, f64>,
}

impl Metric {
    /// Create an empty series
    pub fn new(scope: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            metric: metric.into(),
            tags: BTreeMap::new(),
            namespace: None,
            display_name: None,
            units: None,
            datapoints: BTreeMap::new(),
        }
    }

    /// Builder-style tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_tag(key, value);
        self
    }

    /// Builder-style datapoints
    pub fn with_datapoints(mut self, points: impl IntoIterator<Item = (Timestamp, f64)>) -> Self {
        self.datapoints.extend(points);
        self
    }

    /// Add or replace a tag
    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Add or replace a datapoint
    pub fn add_datapoint(&mut self, timestamp: Timestamp, value: f64) {
        self.datapoints.insert(timestamp, value);
    }

    /// Copy of this series' identity with no datapoints
    pub fn identity_only(&self) -> Self {
        Self {
            datapoints: BTreeMap::new(),
            ..self.clone()
        }
    }

    /// Whether scope, metric, namespace and every query tag match exactly
    pub fn matches_identity(&self, query: &MetricQuery) -> bool {
        self.scope == query.scope
            && self.metric == query.metric
            && (query.namespace.is_none() || self.namespace == query.namespace)
            && query
                .tags
                .iter()
                .all(|(k, v)| self.tags.get(k).map(|t| t == v).unwrap_or(false))
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.metric)?;
        if !self.tags.is_empty() {
            let tags: Vec<String> = self.tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            write!(f, "{{{}}}", tags.join(","))?;
        }
        Ok(())
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// Aggregation functions understood by the storage layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregator {
    /// Interpolated minimum
    Min,
    /// Interpolated maximum
    Max,
    /// Interpolated sum
    Sum,
    /// Average
    Avg,
    /// Standard deviation
    Dev,
    /// Count
    Count,
    /// Sum that treats missing values as zero (no interpolation)
    Zimsum,
    /// Minimum without interpolation
    Mimmin,
    /// Maximum without interpolation
    Mimmax,
    /// Explicitly interpolated minimum
    Imin,
    /// Explicitly interpolated maximum
    Imax,
    /// Explicitly interpolated sum
    Isum,
}

impl Aggregator {
    /// Every aggregator, in declaration order
    pub const ALL: [Aggregator; 12] = [
        Aggregator::Min,
        Aggregator::Max,
        Aggregator::Sum,
        Aggregator::Avg,
        Aggregator::Dev,
        Aggregator::Count,
        Aggregator::Zimsum,
        Aggregator::Mimmin,
        Aggregator::Mimmax,
        Aggregator::Imin,
        Aggregator::Imax,
        Aggregator::Isum,
    ];

    /// Short-hand description used on the wire
    pub fn description(&self) -> &'static str {
        match self {
            Aggregator::Min => "min",
            Aggregator::Max => "max",
            Aggregator::Sum => "sum",
            Aggregator::Avg => "avg",
            Aggregator::Dev => "dev",
            Aggregator::Count => "count",
            Aggregator::Zimsum => "zimsum",
            Aggregator::Mimmin => "mimmin",
            Aggregator::Mimmax => "mimmax",
            Aggregator::Imin => "imin",
            Aggregator::Imax => "imax",
            Aggregator::Isum => "isum",
        }
    }
}

impl fmt::Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl FromStr for Aggregator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Aggregator::ALL
            .iter()
            .copied()
            .find(|a| a.description().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown aggregator: {}", s))
    }
}

// ============================================================================
// MetricQuery
// ============================================================================

/// A concrete time-series query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    /// Scope
    pub scope: String,
    /// Metric name
    pub metric: String,
    /// Tag filters
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Inclusive start (ms)
    pub start_timestamp: Timestamp,
    /// Inclusive end (ms)
    pub end_timestamp: Timestamp,
    /// Optional namespace
    #[serde(default)]
    pub namespace: Option<String>,
    /// Aggregator applied across matching series
    #[serde(default)]
    pub aggregator: Option<Aggregator>,
    /// Downsampling aggregator
    #[serde(default)]
    pub downsampler: Option<Aggregator>,
    /// Downsampling period (ms)
    #[serde(default)]
    pub downsampling_period: Option<i64>,
    /// Requested percentiles
    #[serde(default)]
    pub percentile: Option<Vec<f64>>,
    /// Return histogram buckets instead of aggregated values
    #[serde(default)]
    pub show_histogram_buckets: bool,
}

impl MetricQuery {
    /// Create a query with no tags, aggregator or downsampling
    pub fn new(
        scope: impl Into<String>,
        metric: impl Into<String>,
        start_timestamp: Timestamp,
        end_timestamp: Timestamp,
    ) -> Self {
        Self {
            scope: scope.into(),
            metric: metric.into(),
            tags: BTreeMap::new(),
            start_timestamp,
            end_timestamp,
            namespace: None,
            aggregator: None,
            downsampler: None,
            downsampling_period: None,
            percentile: None,
            show_histogram_buckets: false,
        }
    }

    /// Builder-style tag filter
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Builder-style aggregator
    pub fn with_aggregator(mut self, aggregator: Aggregator) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// Time span covered by the query
    pub fn time_range_ms(&self) -> i64 {
        self.end_timestamp - self.start_timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregator_parse_is_case_insensitive() {
        assert_eq!("ZimSum".parse::<Aggregator>().unwrap(), Aggregator::Zimsum);
        assert_eq!(" avg ".parse::<Aggregator>().unwrap(), Aggregator::Avg);
        assert!("median".parse::<Aggregator>().is_err());
    }

    #[test]
    fn test_aggregator_serde_lowercase() {
        let json = serde_json::to_string(&Aggregator::Mimmax).unwrap();
        assert_eq!(json, "\"mimmax\"");
    }

    #[test]
    fn test_metric_display() {
        let metric = Metric::new("scope", "cpu").with_tag("host", "a");
        assert_eq!(metric.to_string(), "scope:cpu{host=a}");
    }

    #[test]
    fn test_matches_identity_requires_all_query_tags() {
        let metric = Metric::new("s", "m").with_tag("host", "a").with_tag("dc", "x");
        let query = MetricQuery::new("s", "m", 0, 10).with_tag("host", "a");
        assert!(metric.matches_identity(&query));

        let query = query.with_tag("rack", "1");
        assert!(!metric.matches_identity(&query));
    }
}
