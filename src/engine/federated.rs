//! Federated Metric Engine
//!
//! Holds the shared `Index` snapshot and answers the two questions the rest
//! of the database asks about federation:
//!
//! - **split**: which physical series, over which windows, serve a query
//! - **try_map_metric_to_sub_metric**: which physical series a point goes to
//!
//! The snapshot is reloaded by whichever caller first finds it older than
//! `cache_timeout_ms`. Reloads are single-flight and publish the new
//! snapshot with one pointer swap; readers already holding the old `Arc`
//! finish against it undisturbed.

use crate::error::FederationResult;
use crate::engine::split::{select_sub_metrics, specialise};
use crate::index::{Index, IndexSource};
use crate::model::{Change, Era, FederatedMetric, Tags};
use crate::query::{dedup_all, MetricQuery};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Engine statistics
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    /// Federated metrics in the current snapshot
    pub federated_metrics: usize,
    /// When the current snapshot was taken (Unix millis)
    pub snapshot_ts: i64,
    /// Snapshots loaded since the engine was created, the first one included
    pub reloads: u64,
}

/// Query splitting and write routing over a cached federation index
pub struct FederatedMetricEngine {
    source: IndexSource,
    cache_timeout_ms: i64,
    /// Current snapshot; replaced wholesale, never mutated
    index: RwLock<Arc<Index>>,
    /// Held for the duration of a reload
    reload_lock: Mutex<()>,
    reloads: AtomicU64,
}

impl FederatedMetricEngine {
    /// Create an engine and load its first snapshot
    pub async fn new(source: IndexSource, cache_timeout_ms: i64) -> FederationResult<Self> {
        let index = source.load().await?;
        Ok(Self {
            source,
            cache_timeout_ms,
            index: RwLock::new(Arc::new(index)),
            reload_lock: Mutex::new(()),
            reloads: AtomicU64::new(1),
        })
    }

    pub fn cache_timeout_ms(&self) -> i64 {
        self.cache_timeout_ms
    }

    pub fn source(&self) -> &IndexSource {
        &self.source
    }

    /// Split a logical query into physical queries
    ///
    /// A metric that was never federated comes back as the query itself.
    /// Otherwise every era overlapping the window contributes one query per
    /// selected sub-metric, clipped to the era, and overlapping windows on
    /// the same physical metric are merged.
    pub async fn split(&self, query: &MetricQuery) -> FederationResult<Vec<MetricQuery>> {
        query.validate()?;
        let index = self.current_index().await?;

        let Some(eras) = index.eras(&query.metric) else {
            return Ok(vec![query.clone()]);
        };

        let from_ms = query.start_time.saturating_mul(1000);
        let to_ms = query.end_time.map(|end| end.saturating_mul(1000));

        let mut parts = Vec::new();
        for era in Era::filter(eras, from_ms, to_ms, self.cache_timeout_ms)? {
            for sub_metric in select_sub_metrics(&era.metric, &query.tags) {
                let id = self.source.resolver().get_metric(&sub_metric.name).await?;
                parts.push(specialise(query, era, sub_metric, id, self.cache_timeout_ms));
            }
        }

        let parts = dedup_all(parts)?;
        tracing::debug!(
            query = %query,
            parts = parts.len(),
            split = ?parts.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
            "Split query"
        );
        Ok(parts)
    }

    /// Physical series a point of `metric` with `tags` is written to now
    ///
    /// The first sub-metric of the current routing rules whose predicate
    /// matches wins. Unfederated metrics and unmatched points stay on
    /// `metric`.
    pub async fn try_map_metric_to_sub_metric(
        &self,
        metric: &str,
        tags: &Tags,
    ) -> FederationResult<String> {
        let index = self.current_index().await?;
        Ok(route(index.federated_metric(metric), metric, tags))
    }

    /// Physical series a point of `metric` timestamped `at_ms` belongs to
    ///
    /// Uses the routing rules of the era containing `at_ms`, so back-dated
    /// points land where a query for that instant will look for them.
    pub async fn try_map_metric_to_sub_metric_at(
        &self,
        metric: &str,
        at_ms: i64,
        tags: &Tags,
    ) -> FederationResult<String> {
        let index = self.current_index().await?;
        Ok(route(index.federated_metric_at(metric, at_ms), metric, tags))
    }

    /// Whether `name` is a physical sub-series of a federated metric
    pub async fn is_sub_metric(&self, name: &str) -> FederationResult<bool> {
        Ok(self.current_index().await?.is_sub_metric(name))
    }

    /// See `IndexSource::add_index`; visible after the next reload
    pub async fn add_index(&self, metric: &str, tags: Tags) -> FederationResult<Change> {
        self.source.add_index(metric, tags).await
    }

    /// See `IndexSource::remove_index`; visible after the next reload
    pub async fn remove_index(&self, metric: &str, tags: Tags) -> FederationResult<Change> {
        self.source.remove_index(metric, tags).await
    }

    /// Head state of every federated metric, read fresh from the store
    pub async fn list(&self) -> FederationResult<Vec<FederatedMetric>> {
        self.source.list().await
    }

    /// Reload the snapshot now, regardless of its age
    pub async fn refresh(&self) -> FederationResult<()> {
        let _guard = self.reload_lock.lock().await;
        self.reload().await?;
        Ok(())
    }

    /// Current snapshot, reloaded first if it has gone stale
    pub async fn current_index(&self) -> FederationResult<Arc<Index>> {
        let now = self.source.clock().now_millis();
        if let Some(index) = self.fresh_index(now).await {
            return Ok(index);
        }

        let _guard = self.reload_lock.lock().await;
        // Someone else may have reloaded while we waited
        if let Some(index) = self.fresh_index(now).await {
            return Ok(index);
        }
        self.reload().await
    }

    pub async fn stats(&self) -> EngineStats {
        let index = self.index.read().await.clone();
        EngineStats {
            federated_metrics: index.metric_count(),
            snapshot_ts: index.snapshot_ts(),
            reloads: self.reloads.load(Ordering::Relaxed),
        }
    }

    async fn fresh_index(&self, now: i64) -> Option<Arc<Index>> {
        let index = self.index.read().await;
        (!index.is_stale(now, self.cache_timeout_ms)).then(|| index.clone())
    }

    /// Caller must hold `reload_lock`
    async fn reload(&self) -> FederationResult<Arc<Index>> {
        let fresh = Arc::new(self.source.load().await?);
        *self.index.write().await = fresh.clone();
        self.reloads.fetch_add(1, Ordering::Relaxed);
        Ok(fresh)
    }
}

fn route(federated: Option<&FederatedMetric>, metric: &str, tags: &Tags) -> String {
    match federated.and_then(|m| m.find_match(tags)) {
        Some(sub_metric) => {
            tracing::info!(metric, sub_metric = %sub_metric.name, "Remapped metric");
            sub_metric.name.clone()
        }
        None => metric.to_string(),
    }
}
