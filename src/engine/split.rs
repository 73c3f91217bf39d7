//! Query specialisation
//!
//! Pure helpers used by `FederatedMetricEngine::split`: choosing which
//! sub-metrics of an era a query must visit, and narrowing the query to one
//! (era, sub-metric) pair.

use crate::index::MetricId;
use crate::model::{Era, FederatedMetric, SubMetric, Tags};
use crate::query::MetricQuery;

/// Sub-metrics of `metric` a query with `tags` has to read
///
/// Those whose predicate matches the query tags, or every sub-metric when
/// none does.
pub fn select_sub_metrics<'a>(metric: &'a FederatedMetric, tags: &Tags) -> Vec<&'a SubMetric> {
    let matching: Vec<&SubMetric> = metric
        .sub_metrics()
        .iter()
        .filter(|sub| sub.is_match(tags))
        .collect();

    if matching.is_empty() {
        metric.sub_metrics().iter().collect()
    } else {
        matching
    }
}

/// Narrow `query` to `sub_metric` during `era`
///
/// The window is clipped to the era, with the era end extended by the same
/// `2 * cache_timeout_ms` slack `Era::filter` applies, and converted back to
/// seconds.
pub fn specialise(
    query: &MetricQuery,
    era: &Era,
    sub_metric: &SubMetric,
    metric_id: MetricId,
    cache_timeout_ms: i64,
) -> MetricQuery {
    let slack = cache_timeout_ms.saturating_mul(2);
    let start_ms = query.start_time.saturating_mul(1000).max(era.from);
    let era_end_ms = era.to.map(|to| to.saturating_add(slack));

    let end_ms = match (query.end_time, era_end_ms) {
        (Some(end), Some(era_end)) => Some(era_end.min(end.saturating_mul(1000))),
        (Some(end), None) => Some(end.saturating_mul(1000)),
        (None, era_end) => era_end,
    };

    let mut part = query.clone();
    part.metric = sub_metric.name.clone();
    part.metric_id = Some(metric_id);
    part.start_time = start_ms / 1000;
    part.end_time = end_ms.map(|ms| ms / 1000);
    part
}
