//! Metric query evaluation
//!
//! An external expression reader turns a metric expression into a [`QueryTree`]
//! of [`QueryContext`] nodes. The [`QueryProcessor`] evaluates that tree against
//! a discovery collaborator (wildcard expansion) and a storage collaborator
//! (time-series fetch), applying transforms bottom-up.
//!
//! # Architecture
//!
//! ```text
//! QueryTree
//!      │
//!      ▼
//! ┌──────────────────┐
//! │ QueryProcessor   │  children first, then leaf query, then transform
//! └──────────────────┘
//!      │        │
//!      ▼        ▼
//! Discovery   Storage      (DiscoveryService / TsdbService)
//!      │
//!      ▼
//! ┌──────────────────┐
//! │ TransformRegistry│  SUM, AVERAGE, MIN, MAX, COUNT, FILL, ...
//! └──────────────────┘
//!      │
//!      ▼
//! MetricQueryResult       metrics + discovery/storage statistics
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use argus_core::query::{
//!     InMemoryTsdb, QueryContext, QueryProcessor, QueryTree, TransformFunction,
//!     TransformRegistry, TsdbQueryExpression,
//! };
//! use argus_core::types::Metric;
//!
//! # tokio_test_block(async {
//! let tsdb = Arc::new(InMemoryTsdb::new());
//! tsdb.insert(Metric::new("sys", "cpu").with_datapoints([(1_000, 2.0)]));
//!
//! let processor = QueryProcessor::new(
//!     tsdb.clone(),
//!     tsdb,
//!     Arc::new(TransformRegistry::with_defaults()),
//! );
//!
//! let mut tree = QueryTree::new(QueryContext::transform(TransformFunction::Sum));
//! tree.add_child(
//!     tree.root(),
//!     QueryContext::expression(TsdbQueryExpression::new("sys", "cpu", 0, 60_000)),
//! );
//!
//! let result = processor.evaluate(&tree, 60_000).await.unwrap();
//! assert_eq!(result.metrics.len(), 1);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

pub mod aggregator;
pub mod context;
pub mod error;
pub mod processor;
pub mod result;
pub mod services;
pub mod stubs;
pub mod transform;

pub use aggregator::{effective_aggregator, substitute_aggregator};
pub use context::{ContextId, QueryContext, QueryTree, TsdbQueryExpression};
pub use error::{QueryError, QueryErrorKind, QueryResult};
pub use processor::QueryProcessor;
pub use result::{ExpandedTimeSeriesRange, MetricQueryResult, TimeWindow};
pub use services::{DiscoveryService, TsdbService};
pub use stubs::InMemoryTsdb;
pub use transform::{Transform, TransformFunction, TransformRegistry};
