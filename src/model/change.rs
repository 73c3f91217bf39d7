//! Routing-history edits
//!
//! A `Change` is one ADD or REMOVE of a tag predicate on a logical metric.
//! The persisted `ChangeLog` of a metric is the source of truth; every
//! other structure in this crate is derived from it.

use crate::error::{FederationError, FederationResult};
use crate::model::tags::Tags;
use serde::{Deserialize, Serialize};

/// Kind of routing edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    /// Start routing matching points to a new sub-series
    Add,
    /// Stop routing to an existing sub-series
    Remove,
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeOp::Add => write!(f, "ADD"),
            ChangeOp::Remove => write!(f, "REMOVE"),
        }
    }
}

/// One routing-history edit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Unix timestamp in milliseconds at which the edit takes effect
    pub timestamp: i64,
    pub operation: ChangeOp,
    /// Tag predicate of the affected sub-series
    pub tags: Tags,
}

impl Change {
    pub fn add(timestamp: i64, tags: Tags) -> Self {
        Self {
            timestamp,
            operation: ChangeOp::Add,
            tags,
        }
    }

    pub fn remove(timestamp: i64, tags: Tags) -> Self {
        Self {
            timestamp,
            operation: ChangeOp::Remove,
            tags,
        }
    }

    /// Physical name of the sub-series this change addresses under `root`
    pub fn sub_metric_name(&self, root: &str) -> String {
        sub_metric_name(root, &self.tags)
    }
}

/// Derive a physical sub-series name: `root` followed by `/key/value` for
/// each tag in ascending key order, e.g. `foo/cluster/a`.
///
/// The write path and the read path must agree on this byte for byte.
pub fn sub_metric_name(root: &str, tags: &Tags) -> String {
    let mut name = String::with_capacity(
        root.len() + tags.iter().map(|(k, v)| k.len() + v.len() + 2).sum::<usize>(),
    );
    name.push_str(root);
    for (key, value) in tags {
        name.push('/');
        name.push_str(key);
        name.push('/');
        name.push_str(value);
    }
    name
}

/// Ordered routing history of one metric
///
/// Sorted by timestamp. Changes sharing a timestamp keep their insertion
/// order, which makes replay deterministic even for ties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Change>", into = "Vec<Change>")]
pub struct ChangeLog {
    changes: Vec<Change>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a change, keeping timestamp order
    pub fn push(&mut self, change: Change) {
        let pos = self
            .changes
            .partition_point(|c| c.timestamp <= change.timestamp);
        self.changes.insert(pos, change);
    }

    /// Timestamp for a new change so that it sorts strictly after every
    /// recorded one, even if the clock went backwards
    pub fn next_timestamp(&self, now_millis: i64) -> FederationResult<i64> {
        match self.changes.last() {
            Some(last) if last.timestamp >= now_millis => {
                last.timestamp.checked_add(1).ok_or_else(|| {
                    FederationError::Consistency(format!(
                        "no instant left after last change at {}",
                        last.timestamp
                    ))
                })
            }
            _ => Ok(now_millis),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }

    pub fn as_slice(&self) -> &[Change] {
        &self.changes
    }

    pub fn last(&self) -> Option<&Change> {
        self.changes.last()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

impl From<Vec<Change>> for ChangeLog {
    fn from(mut changes: Vec<Change>) -> Self {
        // Stable: ties keep stored order
        changes.sort_by_key(|c| c.timestamp);
        Self { changes }
    }
}

impl From<ChangeLog> for Vec<Change> {
    fn from(log: ChangeLog) -> Self {
        log.changes
    }
}

impl FromIterator<Change> for ChangeLog {
    fn from_iter<I: IntoIterator<Item = Change>>(iter: I) -> Self {
        iter.into_iter().collect::<Vec<_>>().into()
    }
}

impl<'a> IntoIterator for &'a ChangeLog {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}
