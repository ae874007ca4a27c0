//! Query context tree
//!
//! The external expression reader turns an expression such as
//! `SUM(-1h:scope:metric{host=a}:avg, -1h:scope:metric{host=b}:avg)` into a tree of
//! [`QueryContext`] nodes. Nodes are stored in a [`QueryTree`] arena and refer to
//! each other by [`ContextId`]; the parent link is an index and never owns anything.
//!
//! ```text
//!            [0] transform=SUM
//!            /               \
//!   [1] expression A     [2] expression B
//! ```

use crate::types::{Aggregator, MetricQuery, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::transform::TransformFunction;

/// Index of a node inside a [`QueryTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(usize);

impl ContextId {
    /// Position of the node in the arena
    pub fn index(&self) -> usize {
        self.0
    }
}

// ============================================================================
// Leaf expression
// ============================================================================

/// Raw time-series query attached to a leaf (or hybrid) node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TsdbQueryExpression {
    /// Scope
    pub scope: String,
    /// Metric name
    pub metric: String,
    /// Tag filters, may contain wildcards
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Start of the queried range (ms)
    pub start_timestamp: Timestamp,
    /// End of the queried range (ms)
    pub end_timestamp: Timestamp,
    /// Optional namespace
    #[serde(default)]
    pub namespace: Option<String>,
    /// Requested aggregator
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
    /// Return histogram buckets
    #[serde(default)]
    pub show_histogram_buckets: bool,
}

impl TsdbQueryExpression {
    /// Create an expression with no tags, aggregator or downsampling
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

    /// Builder-style downsampling
    pub fn with_downsampling(mut self, downsampler: Aggregator, period_ms: i64) -> Self {
        self.downsampler = Some(downsampler);
        self.downsampling_period = Some(period_ms);
        self
    }

    /// Builder-style percentiles
    pub fn with_percentile(mut self, percentile: Vec<f64>) -> Self {
        self.percentile = Some(percentile);
        self
    }

    /// Builder-style histogram buckets flag
    pub fn with_histogram_buckets(mut self, show: bool) -> Self {
        self.show_histogram_buckets = show;
        self
    }

    /// Concrete query carrying every field of this expression
    ///
    /// The aggregator is copied verbatim; substitution happens in the processor.
    pub fn to_metric_query(&self) -> MetricQuery {
        MetricQuery {
            scope: self.scope.clone(),
            metric: self.metric.clone(),
            tags: self.tags.clone(),
            start_timestamp: self.start_timestamp,
            end_timestamp: self.end_timestamp,
            namespace: self.namespace.clone(),
            aggregator: self.aggregator,
            downsampler: self.downsampler,
            downsampling_period: self.downsampling_period,
            percentile: self.percentile.clone(),
            show_histogram_buckets: self.show_histogram_buckets,
        }
    }
}

// ============================================================================
// QueryContext
// ============================================================================

/// A node in the query tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryContext {
    /// Transform applied to the merged metrics of this node; `None` passes through
    pub transform: Option<TransformFunction>,
    /// Raw time-series query evaluated at this node
    pub expression: Option<TsdbQueryExpression>,
    /// Literal arguments of the transform, in order
    pub constants: Vec<String>,
    children: Vec<ContextId>,
    parent: Option<ContextId>,
}

impl QueryContext {
    /// Node that applies `function` to its children
    pub fn transform(function: TransformFunction) -> Self {
        Self {
            transform: Some(function),
            ..Default::default()
        }
    }

    /// Leaf node evaluating a raw query
    pub fn expression(expression: TsdbQueryExpression) -> Self {
        Self {
            expression: Some(expression),
            ..Default::default()
        }
    }

    /// Builder-style constants
    pub fn with_constants<I, S>(mut self, constants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constants = constants.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style expression on a transform node (hybrid node)
    pub fn with_expression(mut self, expression: TsdbQueryExpression) -> Self {
        self.expression = Some(expression);
        self
    }

    /// Children in evaluation order
    pub fn children(&self) -> &[ContextId] {
        &self.children
    }

    /// Parent node, if any
    pub fn parent(&self) -> Option<ContextId> {
        self.parent
    }

    /// Whether the node has children
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// A node with nothing to evaluate
    pub fn is_empty(&self) -> bool {
        self.transform.is_none() && self.expression.is_none() && self.children.is_empty()
    }
}

// ============================================================================
// QueryTree
// ============================================================================

/// Arena owning every node of one query expression
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTree {
    nodes: Vec<QueryContext>,
}

impl QueryTree {
    /// Create a tree holding only `root`
    pub fn new(mut root: QueryContext) -> Self {
        root.children.clear();
        root.parent = None;
        Self { nodes: vec![root] }
    }

    /// Root node id
    pub fn root(&self) -> ContextId {
        ContextId(0)
    }

    /// Append `child` as the last child of `parent`
    ///
    /// Returns `None` when `parent` does not belong to this tree.
    pub fn add_child(&mut self, parent: ContextId, mut child: QueryContext) -> Option<ContextId> {
        if parent.0 >= self.nodes.len() {
            return None;
        }
        let id = ContextId(self.nodes.len());
        child.children.clear();
        child.parent = Some(parent);
        self.nodes.push(child);
        self.nodes[parent.0].children.push(id);
        Some(id)
    }

    /// Node by id
    pub fn get(&self, id: ContextId) -> Option<&QueryContext> {
        self.nodes.get(id.0)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Trees always hold at least the root
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids of nodes that have no transform, no expression and no children
    pub fn invalid_nodes(&self) -> Vec<ContextId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_empty())
            .map(|(i, _)| ContextId(i))
            .collect()
    }

    /// Validate the structural invariant of every node
    pub fn validate(&self) -> Result<(), String> {
        let invalid = self.invalid_nodes();
        if invalid.is_empty() {
            Ok(())
        } else {
            let ids: Vec<String> = invalid.iter().map(|id| id.0.to_string()).collect();
            Err(format!(
                "query context nodes [{}] have no transform, expression or children",
                ids.join(", ")
            ))
        }
    }

    /// Depth of the tree (a lone root has depth 1)
    pub fn depth(&self) -> usize {
        let mut depths = vec![0usize; self.nodes.len()];
        let mut max = 0;
        // Children always have a larger index than their parent.
        for (i, node) in self.nodes.iter().enumerate() {
            depths[i] = match node.parent {
                Some(p) => depths[p.0] + 1,
                None => 1,
            };
            max = max.max(depths[i]);
        }
        max
    }
}
