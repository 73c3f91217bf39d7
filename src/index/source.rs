//! Index Source - loading snapshots and editing routing history
//!
//! Mutations bypass any cached `Index`: they read the metric's history
//! fresh from the store, validate the edited history, provision the new
//! sub-series ID and only then persist. Cached snapshots pick the change up
//! on their next reload.
//!
//! ```text
//! add_index(foo, cluster=a)
//!   store.get(foo) → log + Change{ADD, cluster=a}
//!   replay(log)              (reject if inconsistent)
//!   resolver.get_or_create(foo, foo/cluster/a)
//!   put_with_retry(foo, log)
//! ```

use crate::clock::Clock;
use crate::error::FederationResult;
use crate::index::resolver::IdResolver;
use crate::index::snapshot::Index;
use crate::index::store::{put_with_retry, ChangeStore, RetryConfig};
use crate::model::{check_metric_and_tags, Change, ChangeOp, FederatedMetric, Tags};
use std::sync::Arc;

/// Loads `Index` snapshots and applies administrative edits
#[derive(Clone)]
pub struct IndexSource {
    store: Arc<dyn ChangeStore>,
    resolver: Arc<dyn IdResolver>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
}

impl IndexSource {
    pub fn new(
        store: Arc<dyn ChangeStore>,
        resolver: Arc<dyn IdResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            resolver,
            clock,
            retry: RetryConfig::default(),
        }
    }

    /// Override the put retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn resolver(&self) -> &Arc<dyn IdResolver> {
        &self.resolver
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Scan the store and build a fresh snapshot
    ///
    /// The snapshot is stamped with the time before the scan started, so
    /// its age never understates how stale it may be.
    pub async fn load(&self) -> FederationResult<Index> {
        let snapshot_ts = self.clock.now_millis();
        let changes = self.store.scan().await?;
        let index = Index::build(changes, snapshot_ts)?;

        tracing::info!(
            federated_metrics = index.metric_count(),
            snapshot_ts,
            "Loaded federation index"
        );
        Ok(index)
    }

    /// Start routing points of `metric` that carry `tags` to a new sub-series
    pub async fn add_index(&self, metric: &str, tags: Tags) -> FederationResult<Change> {
        self.alter_index(ChangeOp::Add, metric, tags).await
    }

    /// Stop routing to the sub-series selected by `tags`
    pub async fn remove_index(&self, metric: &str, tags: Tags) -> FederationResult<Change> {
        self.alter_index(ChangeOp::Remove, metric, tags).await
    }

    /// Current state of every federated metric, read fresh from the store
    pub async fn list(&self) -> FederationResult<Vec<FederatedMetric>> {
        Ok(Index::build(self.store.scan().await?, self.clock.now_millis())?.list())
    }

    async fn alter_index(
        &self,
        operation: ChangeOp,
        metric: &str,
        tags: Tags,
    ) -> FederationResult<Change> {
        // Same limits as an ingested series, so the rule can match a point
        check_metric_and_tags(metric, &tags)?;

        let mut changes = self.store.get(metric).await?.unwrap_or_default();
        let change = Change {
            timestamp: changes.next_timestamp(self.clock.now_millis())?,
            operation,
            tags,
        };
        changes.push(change.clone());

        // Reject before anything is persisted
        FederatedMetric::from_changes(metric, &changes)?;

        let sub_metric = change.sub_metric_name(metric);
        if operation == ChangeOp::Add {
            // Split queries address the head by ID as well
            self.resolver.get_or_create_metric(metric).await?;
            let id = self.resolver.get_or_create_metric(&sub_metric).await?;
            tracing::debug!(sub_metric = %sub_metric, id = %id, "Provisioned sub-metric ID");
        }

        put_with_retry(self.store.as_ref(), metric, &changes, &self.retry).await?;

        tracing::info!(
            metric,
            sub_metric = %sub_metric,
            operation = %operation,
            timestamp = change.timestamp,
            "Altered federation index"
        );
        Ok(change)
    }
}
