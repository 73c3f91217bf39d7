//! Eras: time windows with fixed routing rules
//!
//! Folding a metric's `ChangeLog` yields a gapless, non-overlapping sequence
//! of half-open windows `[from, to)`, each paired with the `FederatedMetric`
//! that was authoritative throughout it.
//!
//! ```text
//!   changes:        t1            t2
//!   eras:    (-∞, t1) | [t1, t2) | [t2, +∞)
//!            head       +sub1      +sub2
//! ```

use crate::error::{FederationError, FederationResult};
use crate::model::change::ChangeLog;
use crate::model::federated::FederatedMetric;
use serde::Serialize;

/// Start of the first era of every metric (-∞)
pub const BEGINNING_OF_TIME: i64 = i64::MIN;

/// A window of history with constant routing rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Era {
    /// Inclusive start in milliseconds, `BEGINNING_OF_TIME` for the first era
    pub from: i64,
    /// Exclusive end in milliseconds, `None` for the current era
    pub to: Option<i64>,
    /// Routing rules valid throughout the window
    pub metric: FederatedMetric,
}

impl Era {
    /// Fold `changes` into eras, oldest first
    ///
    /// Each change timestamp closes the running era and opens the next one.
    /// Changes sharing a timestamp are applied to the same era, so `from`
    /// is always strictly ascending.
    pub fn build(metric: &str, changes: &ChangeLog) -> FederationResult<Vec<Era>> {
        let mut eras = Vec::with_capacity(changes.len() + 1);
        let mut from = BEGINNING_OF_TIME;
        let mut current = FederatedMetric::new(metric);

        for change in changes {
            if change.timestamp != from {
                eras.push(Era {
                    from,
                    to: Some(change.timestamp),
                    metric: current.clone(),
                });
                from = change.timestamp;
            }
            current = current.apply(change)?;
        }

        eras.push(Era {
            from,
            to: None,
            metric: current,
        });
        Ok(eras)
    }

    /// Keep the eras overlapping the query window `[from, to]` (milliseconds)
    ///
    /// An era ending before `from` is only dropped once it ends more than
    /// `2 * cache_timeout_ms` before the window. An index snapshot may lag
    /// the persisted log by up to one TTL, and a reader that just reloaded
    /// may still race a writer routing on the previous snapshot for up to
    /// another TTL, so points written under the old rules can trail the
    /// era boundary by that much. This assumes reload latency and clock skew
    /// both stay under `cache_timeout_ms`.
    pub fn filter(
        eras: &[Era],
        from: i64,
        to: Option<i64>,
        cache_timeout_ms: i64,
    ) -> FederationResult<Vec<&Era>> {
        let horizon = from.saturating_sub(cache_timeout_ms.saturating_mul(2));
        let mut last: Option<i64> = None;
        let mut kept = Vec::new();

        for era in eras {
            if let Some(prev) = last {
                if prev >= era.from {
                    return Err(FederationError::Invariant(format!(
                        "eras not strictly ascending: {} followed by {}",
                        prev, era.from
                    )));
                }
            }
            last = Some(era.from);

            if matches!(era.to, Some(era_to) if era_to < horizon) {
                continue;
            }
            if matches!(to, Some(to) if era.from > to) {
                continue;
            }
            kept.push(era);
        }

        Ok(kept)
    }

    /// Era containing instant `at` (milliseconds)
    pub fn find(eras: &[Era], at: i64) -> Option<&Era> {
        eras.iter().find(|era| era.contains(at))
    }

    /// Whether `at` falls inside `[from, to)`
    pub fn contains(&self, at: i64) -> bool {
        self.from <= at && self.to.map_or(true, |to| at < to)
    }

    /// Whether this is the open-ended, current era
    pub fn is_current(&self) -> bool {
        self.to.is_none()
    }
}
