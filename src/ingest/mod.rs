//! Time-sharded ingestion
//!
//! Incoming points of one series (metric + tags) may belong to different
//! physical sub-series depending on their own timestamps: a back-filled
//! point from before a split must land where queries for that instant will
//! look for it. `ShardedSeries` routes every point by its timestamp and
//! buffers it under the physical series it belongs to.
//!
//! ```text
//! foo{cluster=a}  t=90  → foo            (before the split at t=100)
//!                 t=120 → foo/cluster/a
//!                 t=130 → foo/cluster/a
//! ```

use crate::engine::FederatedMetricEngine;
use crate::error::{FederationError, FederationResult};
use crate::index::MetricId;
use crate::model::{check_metric_and_tags, Tags};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Value of a data point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValue {
    Long(i64),
    Float(f64),
}

impl From<i64> for PointValue {
    fn from(v: i64) -> Self {
        PointValue::Long(v)
    }
}

impl From<f64> for PointValue {
    fn from(v: f64) -> Self {
        PointValue::Float(v)
    }
}

impl std::fmt::Display for PointValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PointValue::Long(v) => write!(f, "{}", v),
            PointValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// A single measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Unix timestamp in seconds
    pub timestamp: i64,
    pub value: PointValue,
}

/// Buffered points of one physical series
#[derive(Debug, Clone)]
pub struct Shard {
    pub metric: String,
    pub metric_id: MetricId,
    /// Points not yet taken for writing
    pub points: Vec<DataPoint>,
    /// Newest timestamp ever accepted, taken points included
    last_timestamp: Option<i64>,
}

impl Shard {
    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }
}

/// Writer for one logical series that shards points by routing era
pub struct ShardedSeries {
    engine: Arc<FederatedMetricEngine>,
    metric: String,
    tags: Tags,
    /// In order of first use
    shards: Vec<Shard>,
}

impl ShardedSeries {
    /// Start a series; the metric name and tags are validated up front
    pub fn new(
        engine: Arc<FederatedMetricEngine>,
        metric: impl Into<String>,
        tags: Tags,
    ) -> FederationResult<Self> {
        let metric = metric.into();
        check_metric_and_tags(&metric, &tags)?;
        Ok(Self {
            engine,
            metric,
            tags,
            shards: Vec::new(),
        })
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Route and buffer one point, returning the physical series it went to
    ///
    /// Within a physical series timestamps must strictly increase.
    pub async fn add_point(
        &mut self,
        timestamp: i64,
        value: impl Into<PointValue>,
    ) -> FederationResult<&str> {
        let value = value.into();
        if let PointValue::Float(v) = value {
            if !v.is_finite() {
                return Err(FederationError::Validation(format!(
                    "value is NaN or Infinite: {} for timestamp={}",
                    v, timestamp
                )));
            }
        }
        if timestamp < 0 || timestamp > u32::MAX as i64 {
            return Err(FederationError::Validation(format!(
                "{} timestamp={} when trying to add value={} to {}",
                if timestamp < 0 { "negative" } else { "bad" },
                timestamp,
                value,
                self.metric
            )));
        }

        let pos = self.shard_for(timestamp).await?;
        let shard = &mut self.shards[pos];

        if let Some(last) = shard.last_timestamp() {
            if timestamp <= last {
                return Err(FederationError::Validation(format!(
                    "new timestamp={} is less than previous={} when trying to add value={} to {}",
                    timestamp, last, value, shard.metric
                )));
            }
        }

        shard.points.push(DataPoint { timestamp, value });
        shard.last_timestamp = Some(timestamp);
        Ok(&shard.metric)
    }

    /// Buffered shards, in order of first use
    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    /// Hand the buffered points over for writing
    ///
    /// Shards stay open, so ordering is still enforced against points taken
    /// earlier.
    pub fn take_points(&mut self) -> Vec<(String, MetricId, Vec<DataPoint>)> {
        self.shards
            .iter_mut()
            .filter(|shard| !shard.points.is_empty())
            .map(|shard| {
                (
                    shard.metric.clone(),
                    shard.metric_id,
                    std::mem::take(&mut shard.points),
                )
            })
            .collect()
    }

    async fn shard_for(&mut self, timestamp: i64) -> FederationResult<usize> {
        let sub_metric = self
            .engine
            .try_map_metric_to_sub_metric_at(&self.metric, timestamp.saturating_mul(1000), &self.tags)
            .await?;

        if let Some(pos) = self.shards.iter().position(|s| s.metric == sub_metric) {
            return Ok(pos);
        }

        let metric_id = self
            .engine
            .source()
            .resolver()
            .get_or_create_metric(&sub_metric)
            .await?;
        tracing::debug!(
            metric = %self.metric,
            sub_metric = %sub_metric,
            id = %metric_id,
            "Opened series shard"
        );
        self.shards.push(Shard {
            metric: sub_metric,
            metric_id,
            points: Vec::new(),
            last_timestamp: None,
        });
        Ok(self.shards.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::index::{IndexSource, MemoryChangeStore, MetricIdRegistry};
    use crate::model::parse_tags;

    /// Engine over a metric `foo` split on cluster=a at t=100s
    async fn engine() -> Arc<FederatedMetricEngine> {
        let clock = Arc::new(ManualClock::new(100_000));
        let source = IndexSource::new(
            Arc::new(MemoryChangeStore::new()),
            Arc::new(MetricIdRegistry::in_memory()),
            clock.clone(),
        );
        source
            .add_index("foo", parse_tags("cluster=a").unwrap())
            .await
            .unwrap();
        clock.advance(50_000);
        Arc::new(FederatedMetricEngine::new(source, 600_000).await.unwrap())
    }

    async fn series() -> ShardedSeries {
        ShardedSeries::new(engine().await, "foo", parse_tags("cluster=a host=x").unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_points_sharded_by_timestamp() {
        let mut series = series().await;

        assert_eq!(series.add_point(90, 1i64).await.unwrap(), "foo");
        assert_eq!(series.add_point(120, 2.5).await.unwrap(), "foo/cluster/a");
        assert_eq!(series.add_point(130, 3i64).await.unwrap(), "foo/cluster/a");
        // Back-filled point is fine in its own shard
        assert_eq!(series.add_point(95, 4i64).await.unwrap(), "foo");

        let shards = series.shards();
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].metric, "foo");
        assert_eq!(shards[0].points.len(), 2);
        assert_eq!(shards[1].points[0].value, PointValue::Float(2.5));
        assert_ne!(shards[0].metric_id, shards[1].metric_id);
    }

    #[tokio::test]
    async fn test_out_of_order_within_shard_rejected() {
        let mut series = series().await;
        series.add_point(130, 1i64).await.unwrap();

        let err = series.add_point(130, 2i64).await.unwrap_err();
        assert!(matches!(err, FederationError::Validation(_)));
        assert!(series.add_point(120, 2i64).await.is_err());
    }

    #[tokio::test]
    async fn test_bad_values_and_timestamps_rejected() {
        let mut series = series().await;

        assert!(series.add_point(120, f64::NAN).await.is_err());
        assert!(series.add_point(120, f64::INFINITY).await.is_err());
        assert!(series.add_point(-1, 1i64).await.is_err());
        assert!(series.add_point(u32::MAX as i64 + 1, 1i64).await.is_err());
        assert!(series.shards().is_empty());
    }

    #[tokio::test]
    async fn test_take_points_keeps_ordering() {
        let mut series = series().await;
        series.add_point(120, 1i64).await.unwrap();
        series.add_point(121, 2i64).await.unwrap();

        let taken = series.take_points();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].0, "foo/cluster/a");
        assert_eq!(taken[0].2.len(), 2);
        assert!(series.take_points().is_empty());

        assert!(series.add_point(121, 3i64).await.is_err());
        assert!(series.add_point(122, 3i64).await.is_ok());
    }

    #[tokio::test]
    async fn test_series_needs_valid_metric_and_tags() {
        let engine = engine().await;
        assert!(ShardedSeries::new(engine.clone(), "foo", Tags::new()).is_err());
        assert!(ShardedSeries::new(engine, "foo bar", parse_tags("a=b").unwrap()).is_err());
    }
}
