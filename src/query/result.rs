//! Query result accumulator
//!
//! A [`MetricQueryResult`] is built bottom-up while walking the query tree: every
//! child result is merged into its parent, then the parent's own leaf query and
//! transform are applied. Merge is commutative on the numeric fields.

use crate::types::{Metric, MetricQuery};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::transform::TransformFunction;

const HOUR_MS: i64 = 60 * 60 * 1000;
const DAY_MS: i64 = 24 * HOUR_MS;

// ============================================================================
// Derived labels
// ============================================================================

/// How many series a query expanded to during discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpandedTimeSeriesRange {
    /// No expansion recorded
    RangeZero,
    /// Exactly one series
    RangeOne,
    /// 2 to 10 series
    Range2To10,
    /// 11 to 100 series
    Range11To100,
    /// 101 to 1000 series
    Range101To1000,
    /// 1001 to 10000 series
    Range1001To10000,
    /// More than 10000 series
    RangeOver10000,
}

impl ExpandedTimeSeriesRange {
    /// Classify an expansion count
    pub fn from_count(count: u64) -> Self {
        match count {
            0 => Self::RangeZero,
            1 => Self::RangeOne,
            2..=10 => Self::Range2To10,
            11..=100 => Self::Range11To100,
            101..=1000 => Self::Range101To1000,
            1001..=10000 => Self::Range1001To10000,
            _ => Self::RangeOver10000,
        }
    }

    /// Label used when tagging monitoring data
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RangeZero => "0",
            Self::RangeOne => "1",
            Self::Range2To10 => "2-10",
            Self::Range11To100 => "11-100",
            Self::Range101To1000 => "101-1000",
            Self::Range1001To10000 => "1001-10000",
            Self::RangeOver10000 => ">10000",
        }
    }
}

impl fmt::Display for ExpandedTimeSeriesRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of a time span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeWindow {
    /// Up to one hour
    WithinOneHour,
    /// Up to one day
    WithinOneDay,
    /// Up to seven days
    WithinSevenDays,
    /// Up to thirty days
    WithinThirtyDays,
    /// Longer than thirty days
    OverThirtyDays,
}

impl TimeWindow {
    /// Classify a span in milliseconds; negative spans count as the smallest window
    pub fn from_millis(span_ms: i64) -> Self {
        if span_ms <= HOUR_MS {
            Self::WithinOneHour
        } else if span_ms <= DAY_MS {
            Self::WithinOneDay
        } else if span_ms <= 7 * DAY_MS {
            Self::WithinSevenDays
        } else if span_ms <= 30 * DAY_MS {
            Self::WithinThirtyDays
        } else {
            Self::OverThirtyDays
        }
    }

    /// Label used when tagging monitoring data
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WithinOneHour => "1h",
            Self::WithinOneDay => "1d",
            Self::WithinSevenDays => "7d",
            Self::WithinThirtyDays => "30d",
            Self::OverThirtyDays => ">30d",
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// MetricQueryResult
// ============================================================================

/// Accumulated output and statistics of evaluating a query (sub)tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricQueryResult {
    /// Metrics produced so far, in evaluation order
    pub metrics: Vec<Metric>,
    /// Leaf queries that needed discovery expansion
    pub num_discovery_queries: u64,
    /// Concrete queries produced by discovery
    pub num_discovery_results: u64,
    /// Series returned by storage
    pub num_tsdb_results: u64,
    /// Largest leaf time span seen; `None` until a leaf has been evaluated
    pub query_time_range_ms: Option<i64>,
    /// Earliest leaf start seen; `None` until a leaf has been evaluated
    pub query_start_time_ms: Option<i64>,
    /// Concrete queries sent to storage
    pub inbound_queries: Vec<MetricQuery>,
    /// Transforms applied, in evaluation order
    pub transforms: Vec<TransformFunction>,
    /// Expansion classification, set once the owning context is finished
    pub expanded_time_series_range: Option<ExpandedTimeSeriesRange>,
    /// Time-span classification, set once the owning context is finished
    pub query_time_window: Option<TimeWindow>,
    /// Age classification of the earliest start relative to the evaluation time
    pub query_start_time_window: Option<TimeWindow>,
}

impl MetricQueryResult {
    /// Empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `child` into `self`
    ///
    /// Metrics, inbound queries and transforms are appended after the ones already
    /// present. Counters add, the time range keeps the maximum and the start time
    /// keeps the minimum. An unset value never wins against a set one.
    pub fn merge(&mut self, child: MetricQueryResult) {
        self.metrics.extend(child.metrics);
        self.num_discovery_queries += child.num_discovery_queries;
        self.num_discovery_results += child.num_discovery_results;
        self.num_tsdb_results += child.num_tsdb_results;
        self.inbound_queries.extend(child.inbound_queries);
        self.transforms.extend(child.transforms);

        self.query_time_range_ms = match (self.query_time_range_ms, child.query_time_range_ms) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.query_start_time_ms = match (self.query_start_time_ms, child.query_start_time_ms) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }

    /// Compute the derived monitoring labels from the current counters
    pub fn compute_labels(&mut self, relative_to: i64) {
        self.expanded_time_series_range =
            Some(ExpandedTimeSeriesRange::from_count(self.num_discovery_results));
        self.query_time_window = self.query_time_range_ms.map(TimeWindow::from_millis);
        self.query_start_time_window = self
            .query_start_time_ms
            .map(|start| TimeWindow::from_millis(relative_to - start));
    }

    /// Number of metrics currently held
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Whether no metrics are held
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
