//! Query tree evaluation
//!
//! [`QueryProcessor::evaluate`] walks a [`QueryTree`] depth-first. For every node:
//!
//! 1. children are evaluated in order and merged into an empty accumulator
//! 2. the node's own expression (if any) is evaluated as a leaf query and merged
//! 3. the node's transform (if any) replaces the accumulated metrics
//! 4. derived monitoring labels are computed
//!
//! A node with nothing to evaluate yields an empty result.

use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, instrument, trace};

use super::aggregator::effective_aggregator;
use super::context::{ContextId, QueryTree, TsdbQueryExpression};
use super::error::{QueryError, QueryErrorKind, QueryResult};
use super::result::MetricQueryResult;
use super::services::{DiscoveryService, TsdbService};
use super::transform::{TransformFunction, TransformRegistry};
use crate::config::QueryConfig;
use crate::metrics;

/// Evaluates query trees against discovery and storage collaborators
#[derive(Clone)]
pub struct QueryProcessor {
    discovery: Arc<dyn DiscoveryService>,
    tsdb: Arc<dyn TsdbService>,
    transforms: Arc<TransformRegistry>,
    config: QueryConfig,
}

impl QueryProcessor {
    /// Create a processor with default configuration
    pub fn new(
        discovery: Arc<dyn DiscoveryService>,
        tsdb: Arc<dyn TsdbService>,
        transforms: Arc<TransformRegistry>,
    ) -> Self {
        Self::with_config(discovery, tsdb, transforms, QueryConfig::default())
    }

    /// Create a processor with explicit configuration
    pub fn with_config(
        discovery: Arc<dyn DiscoveryService>,
        tsdb: Arc<dyn TsdbService>,
        transforms: Arc<TransformRegistry>,
        config: QueryConfig,
    ) -> Self {
        Self {
            discovery,
            tsdb,
            transforms,
            config,
        }
    }

    /// Evaluate the whole tree
    ///
    /// `relative_to` is the evaluation time in ms; it anchors relative FILL
    /// boundaries and the start-time window label.
    #[instrument(skip(self, tree), fields(nodes = tree.len()))]
    pub async fn evaluate(
        &self,
        tree: &QueryTree,
        relative_to: i64,
    ) -> QueryResult<MetricQueryResult> {
        self.evaluate_context(tree, tree.root(), relative_to, 1).await
    }

    fn evaluate_context<'a>(
        &'a self,
        tree: &'a QueryTree,
        id: ContextId,
        relative_to: i64,
        depth: usize,
    ) -> BoxFuture<'a, QueryResult<MetricQueryResult>> {
        async move {
            if depth > self.config.max_depth {
                return Err(QueryError::resource_limit(format!(
                    "query tree deeper than {} levels",
                    self.config.max_depth
                )));
            }
            let ctx = tree.get(id).ok_or_else(|| {
                QueryError::new(
                    QueryErrorKind::Internal,
                    format!("context {} does not belong to the tree", id.index()),
                )
            })?;

            let mut result = MetricQueryResult::new();

            for child in ctx.children() {
                let child_result = self
                    .evaluate_context(tree, *child, relative_to, depth + 1)
                    .await?;
                result.merge(child_result);
            }

            if let Some(expression) = &ctx.expression {
                let leaf = self.evaluate_leaf_query(expression).await?;
                result.merge(leaf);
            }

            if let Some(function) = &ctx.transform {
                let constants_only = *function == TransformFunction::Fill
                    && !ctx.has_children()
                    && ctx.expression.is_none();

                let mut constants = ctx.constants.clone();
                if *function == TransformFunction::Fill {
                    constants.push(relative_to.to_string());
                    constants.push(constants_only.to_string());
                }

                let transform = self.transforms.lookup(function)?;
                let input = std::mem::take(&mut result.metrics);
                let input_len = input.len();
                result.metrics = transform.apply(ctx, input, &constants)?;
                result.transforms.push(function.clone());
                metrics::record_transform_evaluated(function.name());

                trace!(
                    transform = %function,
                    input = input_len,
                    output = result.metrics.len(),
                    "Applied transform"
                );
            }

            result.compute_labels(relative_to);
            Ok(result)
        }
        .boxed()
    }

    /// Evaluate a single raw time-series query
    pub async fn evaluate_leaf_query(
        &self,
        expression: &TsdbQueryExpression,
    ) -> QueryResult<MetricQueryResult> {
        let started = Instant::now();

        if expression.end_timestamp < expression.start_timestamp {
            return Err(QueryError::validation(format!(
                "end timestamp {} is before start timestamp {}",
                expression.end_timestamp, expression.start_timestamp
            )));
        }

        let mut query = expression.to_metric_query();
        query.aggregator = effective_aggregator(
            expression.aggregator,
            expression.percentile.is_some(),
            expression.show_histogram_buckets,
        );

        let queries = self.discovery.matching_queries(&query).await?;
        let groups = self.tsdb.get_metrics(&queries).await?;

        let mut result = MetricQueryResult::new();
        result.metrics = groups.into_iter().flat_map(|(_, metrics)| metrics).collect();
        result.num_tsdb_results = result.metrics.len() as u64;

        let unchanged = queries.len() == 1 && queries[0] == query;
        if !unchanged {
            result.num_discovery_results = queries.len() as u64;
            result.num_discovery_queries = 1;
            metrics::record_discovery_expansion(queries.len());
        }

        result.inbound_queries = if queries.is_empty() {
            vec![query.clone()]
        } else {
            queries
        };
        result.query_time_range_ms = Some(query.time_range_ms());
        result.query_start_time_ms = Some(query.start_timestamp);

        metrics::record_leaf_query(started.elapsed().as_secs_f64());
        debug!(
            scope = %query.scope,
            metric = %query.metric,
            series = result.num_tsdb_results,
            expanded = !unchanged,
            "Evaluated leaf query"
        );
        Ok(result)
    }
}

impl std::fmt::Debug for QueryProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryProcessor")
            .field("transforms", &self.transforms)
            .field("config", &self.config)
            .finish()
    }
}
