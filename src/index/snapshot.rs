//! Index - immutable snapshot of all routing history
//!
//! Built wholesale from a store scan and never mutated afterwards. A refresh
//! builds a new `Index`; readers holding the old one keep a consistent view.

use crate::error::FederationResult;
use crate::model::{ChangeLog, ChangeOp, Era, FederatedMetric};
use std::collections::{HashMap, HashSet};

/// Read-only view of every federated metric's history
#[derive(Debug, Default)]
pub struct Index {
    /// metric → full routing history
    changes: HashMap<String, ChangeLog>,
    /// metric → eras, oldest first
    eras: HashMap<String, Vec<Era>>,
    /// Every sub-metric name ever added, removed ones included
    sub_metrics: HashSet<String>,
    /// Wall-clock millis at which the snapshot was taken
    snapshot_ts: i64,
}

impl Index {
    /// Derive eras and the sub-metric registry from raw histories
    ///
    /// Fails if any history is inconsistent; a half-valid index is never
    /// published.
    pub fn build(changes: HashMap<String, ChangeLog>, snapshot_ts: i64) -> FederationResult<Self> {
        let mut eras = HashMap::with_capacity(changes.len());
        let mut sub_metrics = HashSet::new();

        for (metric, log) in &changes {
            eras.insert(metric.clone(), Era::build(metric, log)?);
            sub_metrics.extend(
                log.iter()
                    .filter(|c| c.operation == ChangeOp::Add)
                    .map(|c| c.sub_metric_name(metric)),
            );
        }

        Ok(Self {
            changes,
            eras,
            sub_metrics,
            snapshot_ts,
        })
    }

    #[cfg(test)]
    pub(crate) fn empty(snapshot_ts: i64) -> Self {
        Self {
            snapshot_ts,
            ..Default::default()
        }
    }

    /// Whether `metric` has at least one change on record
    pub fn is_federated(&self, metric: &str) -> bool {
        self.changes.contains_key(metric)
    }

    pub fn changes(&self, metric: &str) -> Option<&ChangeLog> {
        self.changes.get(metric)
    }

    /// Eras of `metric`, oldest first
    pub fn eras(&self, metric: &str) -> Option<&[Era]> {
        self.eras.get(metric).map(|e| e.as_slice())
    }

    /// Routing rules currently in force for `metric`
    pub fn federated_metric(&self, metric: &str) -> Option<&FederatedMetric> {
        self.eras
            .get(metric)
            .and_then(|eras| eras.last())
            .map(|era| &era.metric)
    }

    /// Routing rules in force for `metric` at instant `at` (millis)
    pub fn federated_metric_at(&self, metric: &str, at: i64) -> Option<&FederatedMetric> {
        self.eras
            .get(metric)
            .and_then(|eras| Era::find(eras, at))
            .map(|era| &era.metric)
    }

    /// Whether `name` is a physical sub-series of some federated metric
    pub fn is_sub_metric(&self, name: &str) -> bool {
        self.sub_metrics.contains(name)
    }

    /// Current state of every federated metric, sorted by name
    pub fn list(&self) -> Vec<FederatedMetric> {
        let mut metrics: Vec<FederatedMetric> = self
            .eras
            .values()
            .filter_map(|eras| eras.last())
            .map(|era| era.metric.clone())
            .collect();
        metrics.sort_by(|a, b| a.metric().cmp(b.metric()));
        metrics
    }

    pub fn snapshot_ts(&self) -> i64 {
        self.snapshot_ts
    }

    /// Whether more than `ttl_ms` passed since the snapshot was taken
    pub fn is_stale(&self, now_millis: i64, ttl_ms: i64) -> bool {
        now_millis.saturating_sub(self.snapshot_ts) > ttl_ms
    }

    /// Number of federated metrics
    pub fn metric_count(&self) -> usize {
        self.changes.len()
    }
}
