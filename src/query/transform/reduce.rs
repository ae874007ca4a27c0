//! Pointwise reducers (SUM, AVERAGE, MIN, MAX, COUNT)
//!
//! All input series are collapsed into one series over the union of their
//! timestamps. A series without a value at a timestamp does not contribute.

use std::collections::BTreeMap;

use super::Transform;
use crate::query::context::QueryContext;
use crate::query::error::QueryResult;
use crate::types::{Metric, Timestamp};

const DEFAULT_METRIC_NAME: &str = "result";

/// Reduction applied at each timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    /// Sum of values
    Sum,
    /// Arithmetic mean
    Average,
    /// Smallest value
    Min,
    /// Largest value
    Max,
    /// Number of values
    Count,
}

impl Reducer {
    fn name(&self) -> &'static str {
        match self {
            Reducer::Sum => "SUM",
            Reducer::Average => "AVERAGE",
            Reducer::Min => "MIN",
            Reducer::Max => "MAX",
            Reducer::Count => "COUNT",
        }
    }

    fn reduce(&self, values: &[f64]) -> f64 {
        match self {
            Reducer::Sum => values.iter().sum(),
            Reducer::Average => values.iter().sum::<f64>() / values.len() as f64,
            Reducer::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Reducer::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Reducer::Count => values.len() as f64,
        }
    }
}

/// Transform collapsing every input series with a [`Reducer`]
#[derive(Debug, Clone, Copy)]
pub struct ReduceTransform {
    reducer: Reducer,
}

impl ReduceTransform {
    /// Create a reducing transform
    pub fn new(reducer: Reducer) -> Self {
        Self { reducer }
    }
}

impl Transform for ReduceTransform {
    fn apply(
        &self,
        _ctx: &QueryContext,
        metrics: Vec<Metric>,
        _constants: &[String],
    ) -> QueryResult<Vec<Metric>> {
        let Some(first) = metrics.first() else {
            return Ok(Vec::new());
        };

        let scope = common(&metrics, |m| &m.scope).unwrap_or(self.reducer.name()).to_string();
        let name = common(&metrics, |m| &m.metric).unwrap_or(DEFAULT_METRIC_NAME).to_string();

        let mut out = Metric::new(scope, name);
        out.namespace = first.namespace.clone();
        out.tags = first
            .tags
            .iter()
            .filter(|(k, v)| metrics.iter().all(|m| m.tags.get(*k) == Some(*v)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut columns: BTreeMap<Timestamp, Vec<f64>> = BTreeMap::new();
        for metric in &metrics {
            for (ts, value) in &metric.datapoints {
                columns.entry(*ts).or_default().push(*value);
            }
        }
        out.datapoints = columns
            .into_iter()
            .map(|(ts, values)| (ts, self.reducer.reduce(&values)))
            .collect();

        Ok(vec![out])
    }
}

/// Value shared by every metric, if any
fn common<'a>(metrics: &'a [Metric], field: impl Fn(&'a Metric) -> &'a String) -> Option<&'a str> {
    let first = field(metrics.first()?);
    metrics
        .iter()
        .all(|m| field(m) == first)
        .then_some(first.as_str())
}
