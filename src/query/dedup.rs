//! Interval merging for split queries
//!
//! Splitting a query era by era can yield several queries against the same
//! physical metric whose windows touch or overlap. Each group of same-metric
//! queries is swept as a set of open/close events and collapsed to the
//! union of its windows.
//!
//! ```text
//!   [0, 10] [10, 20]    [15, 25]    [40, 50]
//!   ├────────┼──────────────┤        ├──────┤
//!   [0, 25]                          [40, 50]
//! ```

use crate::error::{FederationError, FederationResult};
use crate::query::types::MetricQuery;
use std::collections::BTreeMap;

/// Stand-in for an open end while sweeping
const OPEN_END: i64 = i64::MAX;

/// Merge overlapping windows per metric
///
/// Groups come out in order of first appearance; windows within a group
/// come out ascending.
pub fn dedup_all(queries: Vec<MetricQuery>) -> FederationResult<Vec<MetricQuery>> {
    let mut groups: Vec<Vec<MetricQuery>> = Vec::new();
    for query in queries {
        match groups.iter_mut().find(|g| g[0].metric == query.metric) {
            Some(group) => group.push(query),
            None => groups.push(vec![query]),
        }
    }

    let mut result = Vec::new();
    for group in &groups {
        result.extend(dedup_track(group)?);
    }
    Ok(result)
}

/// Merge the windows of queries that all target one metric
///
/// Every output copies the first query's parameters with a merged window.
/// Windows sharing an endpoint are joined. An isolated zero-length window
/// `[t, t]` is kept as is.
pub fn dedup_track(queries: &[MetricQuery]) -> FederationResult<Vec<MetricQuery>> {
    let Some(template) = queries.first() else {
        return Ok(Vec::new());
    };

    // time → (opens, closes)
    let mut events: BTreeMap<i64, (i64, i64)> = BTreeMap::new();
    for query in queries {
        if query.metric != template.metric {
            return Err(FederationError::Invariant(format!(
                "cannot merge windows of {} and {}",
                template.metric, query.metric
            )));
        }
        events.entry(query.start_time).or_default().0 += 1;
        events.entry(query.end_time.unwrap_or(OPEN_END)).or_default().1 += 1;
    }

    let mut result = Vec::new();
    let mut opened: i64 = 0;
    let mut window_start: Option<i64> = None;

    for (&time, &(opens, closes)) in &events {
        opened += opens - closes;
        if opened < 0 {
            return Err(FederationError::Invariant(format!(
                "window of {} closes before it opens at {}",
                template.metric, time
            )));
        }

        match (window_start, opened) {
            (None, 0) => result.push(with_window(template, time, time)),
            (None, _) => window_start = Some(time),
            (Some(start), 0) => {
                result.push(with_window(template, start, time));
                window_start = None;
            }
            (Some(_), _) => {}
        }
    }

    Ok(result)
}

fn with_window(template: &MetricQuery, start: i64, end: i64) -> MetricQuery {
    let mut query = template.clone();
    query.start_time = start;
    query.end_time = (end != OPEN_END).then_some(end);
    query
}
