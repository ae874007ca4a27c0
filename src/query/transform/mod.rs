//! Transform functions applied at query tree nodes
//!
//! A transform consumes the metrics collected at a node and produces a new list.
//! Implementations are registered by name in a [`TransformRegistry`] that is
//! constructed once and injected into the processor.
//!
//! # Built-in transforms
//!
//! | Name      | Behavior                                               |
//! |-----------|--------------------------------------------------------|
//! | `SUM`     | Pointwise sum over the union of timestamps             |
//! | `AVERAGE` | Pointwise mean                                         |
//! | `MIN`     | Pointwise minimum                                      |
//! | `MAX`     | Pointwise maximum                                      |
//! | `COUNT`   | Number of series with a value at each timestamp        |
//! | `FILL`    | Fill gaps in series, or draw a constant line           |

pub mod fill;
pub mod reduce;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::context::QueryContext;
use super::error::{QueryError, QueryResult};
use crate::types::Metric;

pub use fill::FillTransform;
pub use reduce::{ReduceTransform, Reducer};

/// Name of a transform attached to a query context
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransformFunction {
    /// Pointwise sum
    Sum,
    /// Pointwise mean
    Average,
    /// Pointwise minimum
    Min,
    /// Pointwise maximum
    Max,
    /// Pointwise series count
    Count,
    /// Gap or line fill
    Fill,
    /// Any other transform, looked up by its upper-case name
    Other(String),
}

impl TransformFunction {
    /// Upper-case name used for registry lookups
    pub fn name(&self) -> &str {
        match self {
            TransformFunction::Sum => "SUM",
            TransformFunction::Average => "AVERAGE",
            TransformFunction::Min => "MIN",
            TransformFunction::Max => "MAX",
            TransformFunction::Count => "COUNT",
            TransformFunction::Fill => "FILL",
            TransformFunction::Other(name) => name,
        }
    }
}

impl fmt::Display for TransformFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TransformFunction {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_uppercase();
        if name.is_empty() {
            return Err(QueryError::parse("transform name cannot be empty"));
        }
        Ok(match name.as_str() {
            "SUM" => TransformFunction::Sum,
            "AVERAGE" | "AVG" => TransformFunction::Average,
            "MIN" => TransformFunction::Min,
            "MAX" => TransformFunction::Max,
            "COUNT" => TransformFunction::Count,
            "FILL" => TransformFunction::Fill,
            _ => TransformFunction::Other(name),
        })
    }
}

/// A transform implementation
pub trait Transform: Send + Sync {
    /// Apply the transform to `metrics` using the node's constants
    ///
    /// For `FILL` the processor appends the evaluation time and the
    /// constants-only flag as the last two constants.
    fn apply(
        &self,
        ctx: &QueryContext,
        metrics: Vec<Metric>,
        constants: &[String],
    ) -> QueryResult<Vec<Metric>>;
}

/// Name-keyed lookup of transform implementations
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, Arc<dyn Transform>>,
}

impl TransformRegistry {
    /// Registry with nothing registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in transform
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(TransformFunction::Sum, ReduceTransform::new(Reducer::Sum));
        registry.register(TransformFunction::Average, ReduceTransform::new(Reducer::Average));
        registry.register(TransformFunction::Min, ReduceTransform::new(Reducer::Min));
        registry.register(TransformFunction::Max, ReduceTransform::new(Reducer::Max));
        registry.register(TransformFunction::Count, ReduceTransform::new(Reducer::Count));
        registry.register(TransformFunction::Fill, FillTransform);
        registry
    }

    /// Register (or replace) the implementation for `function`
    pub fn register(&mut self, function: TransformFunction, transform: impl Transform + 'static) {
        self.transforms
            .insert(function.name().to_string(), Arc::new(transform));
    }

    /// Implementation registered for `function`
    pub fn lookup(&self, function: &TransformFunction) -> QueryResult<Arc<dyn Transform>> {
        self.transforms.get(function.name()).cloned().ok_or_else(|| {
            QueryError::not_found(format!("transform '{}' is not registered", function))
        })
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.transforms.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("transforms", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::QueryErrorKind;

    #[test]
    fn test_parse_transform_function() {
        assert_eq!("sum".parse::<TransformFunction>().unwrap(), TransformFunction::Sum);
        assert_eq!("Avg".parse::<TransformFunction>().unwrap(), TransformFunction::Average);
        assert_eq!(
            "downsample".parse::<TransformFunction>().unwrap(),
            TransformFunction::Other("DOWNSAMPLE".to_string())
        );
        assert!("  ".parse::<TransformFunction>().is_err());
    }

    #[test]
    fn test_default_registry() {
        let registry = TransformRegistry::with_defaults();
        assert_eq!(
            registry.names(),
            vec!["AVERAGE", "COUNT", "FILL", "MAX", "MIN", "SUM"]
        );
        assert!(registry.lookup(&TransformFunction::Fill).is_ok());
    }

    #[test]
    fn test_lookup_unknown_transform() {
        let registry = TransformRegistry::with_defaults();
        let err = registry
            .lookup(&TransformFunction::Other("BOGUS".to_string()))
            .err()
            .unwrap();
        assert_eq!(err.kind, QueryErrorKind::NotFound);
    }

    struct Identity;

    impl Transform for Identity {
        fn apply(&self, _: &QueryContext, metrics: Vec<Metric>, _: &[String]) -> QueryResult<Vec<Metric>> {
            Ok(metrics)
        }
    }

    #[test]
    fn test_register_custom_transform() {
        let mut registry = TransformRegistry::new();
        let function = TransformFunction::Other("IDENTITY".to_string());
        registry.register(function.clone(), Identity);
        let transform = registry.lookup(&function).unwrap();
        let out = transform
            .apply(&QueryContext::default(), vec![Metric::new("s", "m")], &[])
            .unwrap();
        assert_eq!(out.len(), 1);
    }
}
