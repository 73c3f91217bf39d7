//! Federated metrics and their sub-metrics
//!
//! Pure value types: every derivation returns a new value and never mutates
//! its input, so snapshots can be shared freely between readers.

use crate::error::{FederationError, FederationResult};
use crate::model::change::{Change, ChangeLog, ChangeOp};
use crate::model::tags::Tags;
use serde::Serialize;

/// A physical series plus the tag predicate that selects it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubMetric {
    /// Physical series name, e.g. `requests/cluster/a`
    pub name: String,
    /// Routing predicate; empty for the head series
    pub tags: Tags,
}

impl SubMetric {
    pub fn new(name: impl Into<String>, tags: Tags) -> Self {
        Self {
            name: name.into(),
            tags,
        }
    }

    /// The original, untagged series that existed before federation
    pub fn head(name: impl Into<String>) -> Self {
        Self::new(name, Tags::new())
    }

    pub fn is_head(&self) -> bool {
        self.tags.is_empty()
    }

    /// Subset match: every predicate tag must be present with the same value
    /// in `tags`. Extra tags are ignored. The head never matches.
    pub fn is_match(&self, tags: &Tags) -> bool {
        if self.is_head() {
            return false;
        }
        self.tags
            .iter()
            .all(|(key, value)| tags.get(key) == Some(value))
    }
}

/// A logical metric and its routing rules at one point in history
///
/// Always holds exactly one head sub-metric; names are unique. Tagged
/// sub-metrics appear in the order they were added, which is also their
/// routing priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FederatedMetric {
    metric: String,
    sub_metrics: Vec<SubMetric>,
}

impl FederatedMetric {
    /// Un-federated state: the head series only
    pub fn new(metric: impl Into<String>) -> Self {
        let metric = metric.into();
        Self {
            sub_metrics: vec![SubMetric::head(metric.clone())],
            metric,
        }
    }

    /// Replay `changes`, or `None` when the metric has no history at all
    pub fn create(
        metric: &str,
        changes: Option<&ChangeLog>,
    ) -> FederationResult<Option<Self>> {
        changes
            .map(|changes| Self::from_changes(metric, changes))
            .transpose()
    }

    /// Replay a full history starting from the head-only state
    pub fn from_changes(metric: &str, changes: &ChangeLog) -> FederationResult<Self> {
        changes
            .iter()
            .try_fold(Self::new(metric), |current, change| current.apply(change))
    }

    /// Return the state after `change`; `self` is left untouched
    pub fn apply(&self, change: &Change) -> FederationResult<Self> {
        let name = change.sub_metric_name(&self.metric);
        let existing = self.sub_metrics.iter().position(|s| s.name == name);

        let mut sub_metrics = self.sub_metrics.clone();
        match (change.operation, existing) {
            (ChangeOp::Add, Some(_)) => {
                return Err(FederationError::Consistency(format!(
                    "sub-metric {} already exists",
                    name
                )));
            }
            (ChangeOp::Add, None) => {
                sub_metrics.push(SubMetric::new(name, change.tags.clone()));
            }
            (ChangeOp::Remove, None) => {
                return Err(FederationError::Consistency(format!(
                    "sub-metric {} does not exist",
                    name
                )));
            }
            (ChangeOp::Remove, Some(pos)) => {
                if sub_metrics[pos].is_head() {
                    return Err(FederationError::Consistency(format!(
                        "head metric {} can't be removed",
                        name
                    )));
                }
                sub_metrics.remove(pos);
            }
        }

        Ok(Self {
            metric: self.metric.clone(),
            sub_metrics,
        })
    }

    /// Logical metric name
    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn sub_metrics(&self) -> &[SubMetric] {
        &self.sub_metrics
    }

    pub fn head(&self) -> Option<&SubMetric> {
        self.sub_metrics.iter().find(|s| s.is_head())
    }

    /// First sub-metric, in insertion order, whose predicate matches `tags`
    pub fn find_match(&self, tags: &Tags) -> Option<&SubMetric> {
        self.sub_metrics.iter().find(|s| s.is_match(tags))
    }

    /// Whether any tagged sub-metric is currently routed to
    pub fn is_split(&self) -> bool {
        self.sub_metrics.iter().any(|s| !s.is_head())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tags::parse_tags;

    fn tags(s: &str) -> Tags {
        parse_tags(s).unwrap()
    }

    #[test]
    fn test_is_match_is_subset() {
        let sub = SubMetric::new("foo/cluster/a", tags("cluster=a"));

        assert!(sub.is_match(&tags("cluster=a")));
        assert!(sub.is_match(&tags("cluster=a host=x")));
        assert!(!sub.is_match(&tags("cluster=b")));
        assert!(!sub.is_match(&tags("host=x")));
        assert!(!sub.is_match(&Tags::new()));
    }

    #[test]
    fn test_head_never_matches() {
        let head = SubMetric::head("foo");
        assert!(head.is_head());
        assert!(!head.is_match(&Tags::new()));
        assert!(!head.is_match(&tags("cluster=a")));
    }

    #[test]
    fn test_create_without_history() {
        assert!(FederatedMetric::create("foo", None).unwrap().is_none());

        let metric = FederatedMetric::create("foo", Some(&ChangeLog::new()))
            .unwrap()
            .unwrap();
        assert_eq!(metric.sub_metrics().len(), 1);
        assert!(!metric.is_split());
        assert_eq!(metric.head().unwrap().name, "foo");
    }

    #[test]
    fn test_replay_add_and_remove() {
        let log: ChangeLog = vec![
            Change::add(10, tags("cluster=a")),
            Change::add(20, tags("cluster=b")),
            Change::remove(30, tags("cluster=a")),
        ]
        .into();

        let metric = FederatedMetric::from_changes("foo", &log).unwrap();
        let names: Vec<&str> = metric.sub_metrics().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["foo", "foo/cluster/b"]);
    }

    #[test]
    fn test_apply_does_not_mutate() {
        let base = FederatedMetric::new("foo");
        let next = base.apply(&Change::add(10, tags("cluster=a"))).unwrap();

        assert_eq!(base.sub_metrics().len(), 1);
        assert_eq!(next.sub_metrics().len(), 2);
        assert_eq!(next.sub_metrics()[1].name, "foo/cluster/a");
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let log: ChangeLog = vec![
            Change::add(10, tags("cluster=a")),
            Change::add(20, tags("cluster=a")),
        ]
        .into();

        let err = FederatedMetric::from_changes("foo", &log).unwrap_err();
        assert!(matches!(err, FederationError::Consistency(_)));
        assert!(err.to_string().contains("foo/cluster/a already exists"));
    }

    #[test]
    fn test_remove_missing_rejected() {
        let log: ChangeLog = vec![Change::remove(10, tags("cluster=a"))].into();
        let err = FederatedMetric::from_changes("foo", &log).unwrap_err();
        assert!(matches!(err, FederationError::Consistency(_)));
    }

    #[test]
    fn test_head_cannot_be_added_or_removed() {
        let base = FederatedMetric::new("foo");
        assert!(base.apply(&Change::add(1, Tags::new())).is_err());
        assert!(base.apply(&Change::remove(1, Tags::new())).is_err());
    }

    #[test]
    fn test_readd_after_remove() {
        let log: ChangeLog = vec![
            Change::add(10, tags("cluster=a")),
            Change::remove(20, tags("cluster=a")),
            Change::add(30, tags("cluster=a")),
        ]
        .into();
        let metric = FederatedMetric::from_changes("foo", &log).unwrap();
        assert_eq!(metric.sub_metrics().len(), 2);
    }

    #[test]
    fn test_find_match_first_in_insertion_order() {
        let log: ChangeLog = vec![
            Change::add(10, tags("cluster=a")),
            Change::add(20, tags("cluster=a host=x")),
        ]
        .into();
        let metric = FederatedMetric::from_changes("foo", &log).unwrap();

        let hit = metric.find_match(&tags("cluster=a host=x")).unwrap();
        assert_eq!(hit.name, "foo/cluster/a");

        assert!(metric.find_match(&tags("cluster=b")).is_none());
    }
}
