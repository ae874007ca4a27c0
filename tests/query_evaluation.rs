//! End-to-end query evaluation tests
//!
//! Builds query trees by hand and evaluates them against the in-memory
//! discovery/storage catalog.
//!
//! # Test Coverage
//!
//! 1. **Transforms** - SUM over two leaves, hybrid nodes, unknown functions
//! 2. **Discovery statistics** - unchanged queries vs wildcard expansion
//! 3. **FILL** - constants-only line mode vs gap filling over an expression
//! 4. **Statistics merge** - range, start and labels across a whole tree

use std::sync::Arc;

use argus_core::query::{
    ExpandedTimeSeriesRange, InMemoryTsdb, QueryContext, QueryErrorKind, QueryProcessor,
    QueryTree, TransformFunction, TransformRegistry, TsdbQueryExpression,
};
use argus_core::types::Metric;

// =============================================================================
// Test Helpers
// =============================================================================

fn catalog() -> Arc<InMemoryTsdb> {
    let tsdb = Arc::new(InMemoryTsdb::new());
    tsdb.insert(
        Metric::new("sys", "cpu")
            .with_tag("host", "web1")
            .with_datapoints([(1_000, 1.0), (2_000, 2.0)]),
    );
    tsdb.insert(
        Metric::new("sys", "mem")
            .with_tag("host", "web1")
            .with_datapoints([(1_000, 10.0), (3_000, 30.0)]),
    );
    for host in ["web2", "web3"] {
        tsdb.insert(
            Metric::new("sys", "cpu")
                .with_tag("host", host)
                .with_datapoints([(1_000, 5.0)]),
        );
    }
    tsdb
}

fn processor(tsdb: Arc<InMemoryTsdb>) -> QueryProcessor {
    QueryProcessor::new(
        tsdb.clone(),
        tsdb,
        Arc::new(TransformRegistry::with_defaults()),
    )
}

fn leaf(metric: &str, host: &str, start: i64, end: i64) -> QueryContext {
    QueryContext::expression(
        TsdbQueryExpression::new("sys", metric, start, end).with_tag("host", host),
    )
}

// =============================================================================
// Transforms
// =============================================================================

#[tokio::test]
async fn test_sum_of_two_leaves() {
    let processor = processor(catalog());
    let mut tree = QueryTree::new(QueryContext::transform(TransformFunction::Sum));
    tree.add_child(tree.root(), leaf("cpu", "web1", 0, 10_000)).unwrap();
    tree.add_child(tree.root(), leaf("mem", "web1", 0, 30_000)).unwrap();

    let result = processor.evaluate(&tree, 60_000).await.unwrap();

    assert_eq!(result.metrics.len(), 1);
    let summed: Vec<(i64, f64)> = result.metrics[0]
        .datapoints
        .iter()
        .map(|(t, v)| (*t, *v))
        .collect();
    assert_eq!(summed, vec![(1_000, 11.0), (2_000, 2.0), (3_000, 30.0)]);

    assert_eq!(result.num_tsdb_results, 2);
    assert_eq!(result.query_time_range_ms, Some(30_000));
    assert_eq!(result.query_start_time_ms, Some(0));
    assert_eq!(result.transforms, vec![TransformFunction::Sum]);
    assert_eq!(result.inbound_queries.len(), 2);
}

#[tokio::test]
async fn test_hybrid_node_combines_children_and_own_expression() {
    let processor = processor(catalog());
    let root = QueryContext::transform(TransformFunction::Count)
        .with_expression(TsdbQueryExpression::new("sys", "mem", 0, 10_000).with_tag("host", "web1"));
    let mut tree = QueryTree::new(root);
    tree.add_child(tree.root(), leaf("cpu", "web1", 0, 10_000)).unwrap();

    let result = processor.evaluate(&tree, 10_000).await.unwrap();

    assert_eq!(result.num_tsdb_results, 2);
    assert_eq!(result.metrics.len(), 1);
    let counts = &result.metrics[0].datapoints;
    assert_eq!(counts.get(&1_000), Some(&2.0));
    assert_eq!(counts.get(&2_000), Some(&1.0));
    assert_eq!(counts.get(&3_000), Some(&1.0));
}

#[tokio::test]
async fn test_nested_transforms_record_every_function() {
    let processor = processor(catalog());
    let mut tree = QueryTree::new(QueryContext::transform(TransformFunction::Max));
    let sum = tree
        .add_child(tree.root(), QueryContext::transform(TransformFunction::Sum))
        .unwrap();
    tree.add_child(sum, leaf("cpu", "web1", 0, 10_000)).unwrap();
    tree.add_child(tree.root(), leaf("mem", "web1", 5_000, 10_000)).unwrap();

    let result = processor.evaluate(&tree, 10_000).await.unwrap();

    assert_eq!(
        result.transforms,
        vec![TransformFunction::Sum, TransformFunction::Max]
    );
    assert_eq!(result.query_start_time_ms, Some(0));
    assert_eq!(result.query_time_range_ms, Some(10_000));
}

#[tokio::test]
async fn test_unknown_transform_is_not_found() {
    let processor = processor(catalog());
    let mut tree = QueryTree::new(QueryContext::transform(TransformFunction::Other(
        "DERIVATIVE".to_string(),
    )));
    tree.add_child(tree.root(), leaf("cpu", "web1", 0, 10_000)).unwrap();

    let err = processor.evaluate(&tree, 10_000).await.unwrap_err();
    assert_eq!(err.kind, QueryErrorKind::NotFound);
}

#[tokio::test]
async fn test_empty_tree_evaluates_to_nothing() {
    let tsdb = catalog();
    let processor = processor(tsdb.clone());
    let tree = QueryTree::new(QueryContext::default());

    let result = processor.evaluate(&tree, 0).await.unwrap();
    assert!(result.is_empty());
    assert_eq!(result.query_time_range_ms, None);
    assert_eq!(tsdb.fetch_calls(), 0);
}

// =============================================================================
// Discovery statistics
// =============================================================================

#[tokio::test]
async fn test_unchanged_query_is_not_counted_as_discovery() {
    let processor = processor(catalog());
    let tree = QueryTree::new(leaf("cpu", "web1", 0, 10_000));

    let result = processor.evaluate(&tree, 10_000).await.unwrap();
    assert_eq!(result.num_discovery_queries, 0);
    assert_eq!(result.num_discovery_results, 0);
    assert_eq!(result.num_tsdb_results, 1);
    assert_eq!(
        result.expanded_time_series_range,
        Some(ExpandedTimeSeriesRange::RangeZero)
    );
}

#[tokio::test]
async fn test_wildcard_expansion_is_counted_and_batched() {
    let tsdb = catalog();
    let processor = processor(tsdb.clone());
    let tree = QueryTree::new(leaf("cpu", "web*", 0, 10_000));

    let result = processor.evaluate(&tree, 10_000).await.unwrap();

    assert_eq!(result.num_discovery_queries, 1);
    assert_eq!(result.num_discovery_results, 3);
    assert_eq!(result.num_tsdb_results, 3);
    assert_eq!(result.inbound_queries.len(), 3);
    assert_eq!(tsdb.fetch_calls(), 1);
    assert_eq!(
        result.expanded_time_series_range,
        Some(ExpandedTimeSeriesRange::Range2To10)
    );
}

// =============================================================================
// FILL
// =============================================================================

#[tokio::test]
async fn test_fill_without_inputs_emits_constant_line() {
    let processor = processor(catalog());
    let tree = QueryTree::new(
        QueryContext::transform(TransformFunction::Fill)
            .with_constants(["-1h", "", "10m", "0m", "1"]),
    );

    let result = processor.evaluate(&tree, 3_600_000).await.unwrap();

    assert_eq!(result.metrics.len(), 1);
    let line = &result.metrics[0];
    assert_eq!(line.scope, "scope");
    assert_eq!(line.metric, "result");
    assert_eq!(line.datapoints.len(), 7);
    assert!(line.datapoints.values().all(|v| *v == 1.0));
    assert_eq!(result.num_tsdb_results, 0);
}

#[tokio::test]
async fn test_fill_with_expression_fills_gaps_instead() {
    let processor = processor(catalog());
    let tree = QueryTree::new(
        QueryContext::transform(TransformFunction::Fill)
            .with_expression(TsdbQueryExpression::new("sys", "mem", 0, 10_000).with_tag("host", "web1"))
            .with_constants(["1s", "0s", "0"]),
    );

    let result = processor.evaluate(&tree, 10_000).await.unwrap();

    assert_eq!(result.metrics.len(), 1);
    let filled = &result.metrics[0];
    assert_eq!(filled.scope, "sys");
    assert_eq!(filled.metric, "mem");
    assert_eq!(filled.datapoints.get(&2_000), Some(&0.0));
    assert_eq!(filled.datapoints.get(&3_000), Some(&30.0));
    assert_eq!(result.num_tsdb_results, 1);
}
