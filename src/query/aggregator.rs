//! Aggregator substitution for leaf queries
//!
//! The plain MIN, MAX and SUM aggregators historically interpolated across gaps.
//! Leaf queries default to the non-interpolated variants instead; a caller that
//! really wants interpolation asks for the `I`-prefixed form, which maps back to
//! the plain aggregator.

use crate::types::Aggregator;

/// Replace an aggregator with its non-interpolated default
pub fn substitute_aggregator(aggregator: Aggregator) -> Aggregator {
    match aggregator {
        Aggregator::Min => Aggregator::Mimmin,
        Aggregator::Max => Aggregator::Mimmax,
        Aggregator::Sum => Aggregator::Zimsum,
        Aggregator::Imin => Aggregator::Min,
        Aggregator::Imax => Aggregator::Max,
        Aggregator::Isum => Aggregator::Sum,
        other => other,
    }
}

/// Aggregator to send to storage for a leaf query
///
/// Percentile and histogram-bucket queries keep the requested aggregator verbatim.
pub fn effective_aggregator(
    requested: Option<Aggregator>,
    percentile_requested: bool,
    show_histogram_buckets: bool,
) -> Option<Aggregator> {
    if show_histogram_buckets || percentile_requested {
        requested
    } else {
        requested.map(substitute_aggregator)
    }
}
