//! FILL transform
//!
//! Two modes, selected by the constants-only flag the processor appends:
//!
//! - **Line mode** (no input series): constants `start, end, interval, offset, value`.
//!   Emits one `scope:result` series holding `value` at every interval between the
//!   snapped start and end.
//! - **Gap mode**: constants `interval, offset, value`. For each series, grid slots
//!   between consecutive datapoints that have no value receive `value`.
//!
//! Intervals and offsets are written as `<n><unit>` with unit `s`, `m`, `h`, `d`
//! or `w`. Line start and end also accept absolute milliseconds, `-<n><unit>`
//! relative to the evaluation time, or an empty string for the evaluation time.

use std::collections::BTreeMap;

use super::Transform;
use crate::query::context::QueryContext;
use crate::query::error::{QueryError, QueryResult};
use crate::types::{Metric, Timestamp};

/// Scope of the series produced in line mode
pub const DEFAULT_SCOPE_NAME: &str = "scope";
/// Metric name of the series produced in line mode
pub const DEFAULT_METRIC_NAME: &str = "result";
/// Most datapoints one FILL may add to a single series
pub const MAX_FILL_POINTS: i64 = 1_000_000;

/// Fill transform
#[derive(Debug, Clone, Copy, Default)]
pub struct FillTransform;

impl Transform for FillTransform {
    fn apply(
        &self,
        _ctx: &QueryContext,
        metrics: Vec<Metric>,
        constants: &[String],
    ) -> QueryResult<Vec<Metric>> {
        let (args, relative_to, constants_only) = split_trailing(constants)?;

        if constants_only {
            return fill_line(args, relative_to).map(|metric| vec![metric]);
        }

        if args.len() != 3 {
            return Err(QueryError::validation(
                "FILL needs exactly three constants: interval, offset, value",
            ));
        }
        let interval = parse_interval_ms(&args[0])?;
        let offset = parse_interval_ms(&args[1])?;
        let value = parse_value(&args[2])?;
        if interval <= 0 {
            return Err(QueryError::validation("FILL interval must be greater than zero"));
        }

        metrics
            .into_iter()
            .map(|mut metric| {
                metric.datapoints = fill_gaps(&metric.datapoints, interval, offset, value)?;
                Ok(metric)
            })
            .collect()
    }
}

/// Separate the evaluation time and constants-only flag from the user constants
fn split_trailing(constants: &[String]) -> QueryResult<(&[String], i64, bool)> {
    let n = constants.len();
    if n < 2 {
        return Err(QueryError::validation(
            "FILL requires the evaluation time and constants-only flag",
        ));
    }
    let relative_to = constants[n - 2].trim().parse::<i64>().map_err(|e| {
        QueryError::validation(format!("invalid evaluation time '{}'", constants[n - 2]))
            .with_source(e)
    })?;
    let constants_only = constants[n - 1].trim().parse::<bool>().map_err(|e| {
        QueryError::validation(format!("invalid constants-only flag '{}'", constants[n - 1]))
            .with_source(e)
    })?;
    Ok((&constants[..n - 2], relative_to, constants_only))
}

fn fill_line(args: &[String], relative_to: i64) -> QueryResult<Metric> {
    if args.len() != 5 {
        return Err(QueryError::validation(
            "line FILL needs 5 constants (start, end, interval, offset, value)",
        ));
    }
    let start = parse_timestamp(&args[0], relative_to)?;
    let end = parse_timestamp(&args[1], relative_to)?;
    let interval = parse_interval_ms(&args[2])?;
    let offset = parse_interval_ms(&args[3])?;
    let value = parse_value(&args[4])?;

    if start >= end {
        return Err(QueryError::validation("FILL end time must be later than start time"));
    }
    if interval <= 0 {
        return Err(QueryError::validation("FILL interval must be greater than zero"));
    }

    let mut cursor = start
        .checked_sub(start.rem_euclid(interval))
        .ok_or_else(|| out_of_range("start time"))?;
    let end = end - end.rem_euclid(interval);

    let span = end.checked_sub(cursor).ok_or_else(|| out_of_range("time range"))?;
    if span / interval >= MAX_FILL_POINTS {
        return Err(QueryError::validation(format!(
            "FILL range would produce more than {} datapoints",
            MAX_FILL_POINTS
        )));
    }

    let mut metric = Metric::new(DEFAULT_SCOPE_NAME, DEFAULT_METRIC_NAME);
    while cursor < end {
        metric.add_datapoint(shifted(cursor, offset)?, value);
        cursor += interval;
    }
    metric.add_datapoint(shifted(end, offset)?, value);
    Ok(metric)
}

/// Insert `value` into every empty grid slot between consecutive datapoints
fn fill_gaps(
    datapoints: &BTreeMap<Timestamp, f64>,
    interval: i64,
    offset: i64,
    value: f64,
) -> QueryResult<BTreeMap<Timestamp, f64>> {
    let timestamps: Vec<Timestamp> = datapoints.keys().copied().collect();

    let mut added: i64 = 0;
    for pair in timestamps.windows(2) {
        let gap = pair[1].checked_sub(pair[0]).ok_or_else(|| out_of_range("series span"))?;
        added = added.saturating_add((gap - 1) / interval);
    }
    if added > MAX_FILL_POINTS {
        return Err(QueryError::validation(format!(
            "FILL would add more than {} datapoints to one series",
            MAX_FILL_POINTS
        )));
    }

    let mut filled = datapoints.clone();
    for pair in timestamps.windows(2) {
        let (current, next) = (pair[0], pair[1]);
        let mut slot = current.checked_add(interval);
        while let Some(at) = slot.filter(|at| *at < next) {
            // Real datapoints are never overwritten by a shifted fill value.
            filled.entry(shifted(at, offset)?).or_insert(value);
            slot = at.checked_add(interval);
        }
    }
    Ok(filled)
}

fn shifted(timestamp: Timestamp, offset: i64) -> QueryResult<Timestamp> {
    timestamp
        .checked_add(offset)
        .ok_or_else(|| out_of_range("offset"))
}

fn out_of_range(what: &str) -> QueryError {
    QueryError::validation(format!("FILL {} is out of range", what))
}

/// Parse `<n><unit>` into milliseconds
pub fn parse_interval_ms(interval: &str) -> QueryResult<i64> {
    let interval = interval.trim();
    let invalid = || QueryError::validation(format!("invalid time interval '{}'", interval));

    let unit = interval.chars().last().ok_or_else(invalid)?;
    let multiplier: i64 = match unit {
        's' => 1_000,
        'm' => 60 * 1_000,
        'h' => 60 * 60 * 1_000,
        'd' => 24 * 60 * 60 * 1_000,
        'w' => 7 * 24 * 60 * 60 * 1_000,
        _ => return Err(invalid()),
    };
    let digits = &interval[..interval.len() - unit.len_utf8()];
    let amount = digits.parse::<i64>().map_err(|e| invalid().with_source(e))?;
    amount.checked_mul(multiplier).ok_or_else(invalid)
}

fn parse_timestamp(value: &str, relative_to: i64) -> QueryResult<Timestamp> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(relative_to);
    }
    if let Some(relative) = value.strip_prefix('-') {
        return relative_to
            .checked_sub(parse_interval_ms(relative)?)
            .ok_or_else(|| out_of_range("relative time"));
    }
    value.parse::<i64>().map_err(|e| {
        QueryError::validation(format!("could not parse time '{}'", value)).with_source(e)
    })
}

fn parse_value(value: &str) -> QueryResult<f64> {
    value.trim().parse::<f64>().map_err(|e| {
        QueryError::validation(format!("FILL value '{}' is not a number", value)).with_source(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::QueryErrorKind;

    fn constants(args: &[&str], relative_to: i64, constants_only: bool) -> Vec<String> {
        let mut out: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        out.push(relative_to.to_string());
        out.push(constants_only.to_string());
        out
    }

    fn apply(metrics: Vec<Metric>, constants: &[String]) -> QueryResult<Vec<Metric>> {
        FillTransform.apply(&QueryContext::default(), metrics, constants)
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval_ms("10s").unwrap(), 10_000);
        assert_eq!(parse_interval_ms("2m").unwrap(), 120_000);
        assert_eq!(parse_interval_ms("1h").unwrap(), 3_600_000);
        assert_eq!(parse_interval_ms("1d").unwrap(), 86_400_000);
        assert_eq!(parse_interval_ms("1w").unwrap(), 604_800_000);
        assert_eq!(parse_interval_ms("-1m").unwrap(), -60_000);
        assert!(parse_interval_ms("10x").is_err());
        assert!(parse_interval_ms("").is_err());
    }

    #[test]
    fn test_line_mode_absolute_range() {
        let c = constants(&["0", "300000", "1m", "0m", "5"], 0, true);
        let out = apply(Vec::new(), &c).unwrap();
        assert_eq!(out.len(), 1);
        let m = &out[0];
        assert_eq!(m.scope, DEFAULT_SCOPE_NAME);
        assert_eq!(m.metric, DEFAULT_METRIC_NAME);
        assert_eq!(m.datapoints.len(), 6);
        assert!(m.datapoints.values().all(|v| *v == 5.0));
        assert_eq!(m.datapoints.keys().next(), Some(&0));
        assert_eq!(m.datapoints.keys().last(), Some(&300_000));
    }

    #[test]
    fn test_line_mode_relative_and_snapped() {
        let now = 3_600_000 + 30_000;
        let c = constants(&["-1h", "", "10m", "1m", "1.5"], now, true);
        let m = &apply(Vec::new(), &c).unwrap()[0];
        // start snaps to 0, end snaps to 3_600_000, then everything shifts by 1m
        assert_eq!(m.datapoints.keys().next(), Some(&60_000));
        assert_eq!(m.datapoints.keys().last(), Some(&3_660_000));
        assert_eq!(m.datapoints.len(), 7);
    }

    #[test]
    fn test_line_mode_rejects_bad_range() {
        let c = constants(&["1000", "1000", "1s", "0s", "1"], 0, true);
        let err = apply(Vec::new(), &c).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ValidationError);

        let c = constants(&["0", "1000", "1s", "0s"], 0, true);
        assert!(apply(Vec::new(), &c).is_err());
    }

    #[test]
    fn test_gap_mode_fills_missing_slots() {
        let metric = Metric::new("s", "m").with_datapoints([(0, 1.0), (40_000, 2.0), (50_000, 3.0)]);
        let c = constants(&["10s", "0s", "0"], 0, false);
        let out = apply(vec![metric], &c).unwrap();
        let points: Vec<(i64, f64)> = out[0].datapoints.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(
            points,
            vec![
                (0, 1.0),
                (10_000, 0.0),
                (20_000, 0.0),
                (30_000, 0.0),
                (40_000, 2.0),
                (50_000, 3.0)
            ]
        );
    }

    #[test]
    fn test_gap_mode_applies_offset() {
        let metric = Metric::new("s", "m").with_datapoints([(0, 1.0), (30_000, 2.0)]);
        let c = constants(&["10s", "1s", "9"], 0, false);
        let out = apply(vec![metric], &c).unwrap();
        assert_eq!(out[0].datapoints.get(&11_000), Some(&9.0));
        assert_eq!(out[0].datapoints.get(&21_000), Some(&9.0));
        assert_eq!(out[0].datapoints.len(), 4);
    }

    #[test]
    fn test_gap_mode_without_input_is_empty() {
        let c = constants(&["10s", "0s", "0"], 0, false);
        assert!(apply(Vec::new(), &c).unwrap().is_empty());
    }

    #[test]
    fn test_line_mode_offset_overflow_is_rejected() {
        let c = constants(&["0", "1000", "1s", "9223372036854775s", "1"], 0, true);
        let err = apply(Vec::new(), &c).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ValidationError);
    }

    #[test]
    fn test_line_mode_relative_time_overflow_is_rejected() {
        let c = constants(&["-9223372036854775s", "", "1s", "0s", "1"], i64::MIN + 10, true);
        let err = apply(Vec::new(), &c).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ValidationError);
    }

    #[test]
    fn test_line_mode_rejects_unbounded_range() {
        let c = constants(&["0", "9000000000000000000", "1s", "0s", "1"], 0, true);
        let err = apply(Vec::new(), &c).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ValidationError);

        // exactly at the bound is still accepted
        let end = ((MAX_FILL_POINTS - 1) * 1_000).to_string();
        let c = constants(&["0", &end, "1s", "0s", "1"], 0, true);
        let m = &apply(Vec::new(), &c).unwrap()[0];
        assert_eq!(m.datapoints.len() as i64, MAX_FILL_POINTS);
    }

    #[test]
    fn test_gap_mode_offset_overflow_is_rejected() {
        let metric = Metric::new("s", "m").with_datapoints([(0, 1.0), (30_000, 2.0)]);
        let c = constants(&["10s", "9223372036854775s", "0"], 0, false);
        let err = apply(vec![metric], &c).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ValidationError);
    }

    #[test]
    fn test_gap_mode_rejects_unbounded_gap() {
        let metric = Metric::new("s", "m").with_datapoints([(i64::MIN, 1.0), (i64::MAX, 2.0)]);
        let c = constants(&["1s", "0s", "0"], 0, false);
        let err = apply(vec![metric], &c).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ValidationError);

        let metric = Metric::new("s", "m").with_datapoints([(0, 1.0), (9_000_000_000_000, 2.0)]);
        let err = apply(vec![metric], &c).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ValidationError);
    }

    #[test]
    fn test_missing_trailing_constants() {
        let err = apply(Vec::new(), &["10s".to_string()]).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ValidationError);
    }
}
