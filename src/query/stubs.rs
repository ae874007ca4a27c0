//! In-memory discovery and storage
//!
//! [`InMemoryTsdb`] keeps a catalog of series in memory and implements both
//! [`DiscoveryService`] and [`TsdbService`]. It is intended for:
//! - **Unit and integration testing** without a time-series backend
//! - **Local development** of transforms and query trees
//!
//! Discovery understands `*` globs in scope, metric and tag values. Storage returns
//! raw matching series clipped to the query range; it does not aggregate or
//! downsample.
//!
//! # Example
//!
//! ```rust
//! use argus_core::query::stubs::InMemoryTsdb;
//! use argus_core::types::Metric;
//!
//! let tsdb = InMemoryTsdb::new();
//! tsdb.insert(Metric::new("sys", "cpu").with_tag("host", "a").with_datapoints([(1000, 1.0)]));
//! assert_eq!(tsdb.series_count(), 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use tracing::debug;

use super::error::{QueryError, QueryResult};
use super::services::{DiscoveryService, TsdbService};
use crate::types::{Metric, MetricQuery};

const WILDCARD: char = '*';

/// Catalog-backed discovery and storage
#[derive(Debug, Default)]
pub struct InMemoryTsdb {
    series: RwLock<Vec<Metric>>,
    fetched: RwLock<Vec<MetricQuery>>,
    discovery_calls: AtomicU64,
    fetch_calls: AtomicU64,
}

impl InMemoryTsdb {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a series, merging datapoints into an existing series with the same identity
    pub fn insert(&self, metric: Metric) {
        let mut series = self.series.write();
        match series.iter_mut().find(|m| same_identity(m, &metric)) {
            Some(existing) => existing.datapoints.extend(metric.datapoints),
            None => series.push(metric),
        }
    }

    /// Number of distinct series
    pub fn series_count(&self) -> usize {
        self.series.read().len()
    }

    /// Every query received by `get_metrics`, in arrival order
    pub fn fetched_queries(&self) -> Vec<MetricQuery> {
        self.fetched.read().clone()
    }

    /// Number of discovery calls served
    pub fn discovery_calls(&self) -> u64 {
        self.discovery_calls.load(Ordering::Relaxed)
    }

    /// Number of batched fetch calls served
    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DiscoveryService for InMemoryTsdb {
    async fn matching_queries(&self, query: &MetricQuery) -> QueryResult<Vec<MetricQuery>> {
        self.discovery_calls.fetch_add(1, Ordering::Relaxed);

        if !is_wildcard_query(query) {
            return Ok(vec![query.clone()]);
        }

        let scope = glob_to_regex(&query.scope)?;
        let metric = glob_to_regex(&query.metric)?;
        let tags = query
            .tags
            .iter()
            .map(|(k, v)| glob_to_regex(v).map(|re| (k.clone(), re)))
            .collect::<QueryResult<Vec<_>>>()?;

        let mut expanded: Vec<MetricQuery> = Vec::new();
        for series in self.series.read().iter() {
            if !scope.is_match(&series.scope) || !metric.is_match(&series.metric) {
                continue;
            }
            if query.namespace.is_some() && series.namespace != query.namespace {
                continue;
            }
            let tags_match = tags.iter().all(|(key, re)| {
                series.tags.get(key).map(|v| re.is_match(v)).unwrap_or(false)
            });
            if !tags_match {
                continue;
            }

            let mut concrete = query.clone();
            concrete.scope = series.scope.clone();
            concrete.metric = series.metric.clone();
            for (key, value) in concrete.tags.iter_mut() {
                if let Some(actual) = series.tags.get(key) {
                    *value = actual.clone();
                }
            }
            if !expanded.contains(&concrete) {
                expanded.push(concrete);
            }
        }

        debug!(
            scope = %query.scope,
            metric = %query.metric,
            expanded = expanded.len(),
            "Expanded wildcard query"
        );
        Ok(expanded)
    }
}

#[async_trait]
impl TsdbService for InMemoryTsdb {
    async fn get_metrics(
        &self,
        queries: &[MetricQuery],
    ) -> QueryResult<Vec<(MetricQuery, Vec<Metric>)>> {
        self.fetch_calls.fetch_add(1, Ordering::Relaxed);
        self.fetched.write().extend(queries.iter().cloned());

        let series = self.series.read();
        Ok(queries
            .iter()
            .map(|query| {
                let metrics = series
                    .iter()
                    .filter(|m| m.matches_identity(query))
                    .map(|m| {
                        let mut clipped = m.identity_only();
                        clipped.datapoints = m
                            .datapoints
                            .range(query.start_timestamp..=query.end_timestamp)
                            .map(|(k, v)| (*k, *v))
                            .collect();
                        clipped
                    })
                    .collect();
                (query.clone(), metrics)
            })
            .collect())
    }
}

fn same_identity(a: &Metric, b: &Metric) -> bool {
    a.scope == b.scope && a.metric == b.metric && a.tags == b.tags && a.namespace == b.namespace
}

fn is_wildcard_query(query: &MetricQuery) -> bool {
    query.scope.contains(WILDCARD)
        || query.metric.contains(WILDCARD)
        || query.tags.values().any(|v| v.contains(WILDCARD))
}

/// Anchored regex for a `*` glob
fn glob_to_regex(glob: &str) -> QueryResult<Regex> {
    let pattern = glob
        .split(WILDCARD)
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", pattern)).map_err(|e| {
        QueryError::validation(format!("invalid pattern '{}'", glob)).with_source(e)
    })
}
