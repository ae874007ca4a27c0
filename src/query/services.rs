//! Collaborator traits consumed by the query processor

use async_trait::async_trait;

use super::error::QueryResult;
use crate::types::{Metric, MetricQuery};

// =============================================================================
// DiscoveryService
// =============================================================================

/// Expands wildcard queries into concrete per-series queries
#[async_trait]
pub trait DiscoveryService: Send + Sync + 'static {
    /// Concrete queries matching `query`
    ///
    /// A query that needs no expansion is returned unchanged as the only element.
    async fn matching_queries(&self, query: &MetricQuery) -> QueryResult<Vec<MetricQuery>>;
}

// =============================================================================
// TsdbService
// =============================================================================

/// Fetches time-series data for concrete queries
#[async_trait]
pub trait TsdbService: Send + Sync + 'static {
    /// Fetch metrics for every query in one batched call
    ///
    /// The returned groups follow the order of `queries`.
    async fn get_metrics(
        &self,
        queries: &[MetricQuery],
    ) -> QueryResult<Vec<(MetricQuery, Vec<Metric>)>>;
}
