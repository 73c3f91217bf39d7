//! Write/read consistency scenarios
//!
//! Points are routed through the engine into an in-memory point store and
//! read back through `split`, while federation changes are made behind the
//! engine's back and the clock moves in steps of the cache TTL.

use super::FederatedMetricEngine;
use crate::clock::ManualClock;
use crate::index::{IdResolver, IndexSource, MemoryChangeStore, MetricIdRegistry};
use crate::model::{parse_tags, Tags};
use crate::query::MetricQuery;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const DT: i64 = 10_000;

#[derive(Debug, Clone)]
struct Measure {
    time: i64,
    value: i64,
    tags: Tags,
}

/// Points per physical metric, kept sorted by time
#[derive(Default)]
struct PointStore {
    records: Mutex<HashMap<String, Vec<Measure>>>,
}

impl PointStore {
    fn put(&self, metric: &str, time: i64, value: i64, tags: Tags) {
        let mut records = self.records.lock().unwrap();
        let series = records.entry(metric.to_string()).or_default();
        let at = series.partition_point(|m| m.time <= time);
        series.insert(at, Measure { time, value, tags });
    }

    fn query(&self, queries: &[MetricQuery]) -> Vec<Measure> {
        let records = self.records.lock().unwrap();
        let mut found = Vec::new();
        for query in queries {
            let Some(series) = records.get(&query.metric) else {
                continue;
            };
            for measure in series {
                if measure.time < query.start_time * 1000 {
                    continue;
                }
                if matches!(query.end_time, Some(end) if measure.time > end * 1000) {
                    break;
                }
                if query.tags.iter().all(|(k, v)| measure.tags.get(k) == Some(v)) {
                    found.push(measure.clone());
                }
            }
        }
        found
    }
}

struct Harness {
    clock: Arc<ManualClock>,
    registry: Arc<MetricIdRegistry>,
    source: IndexSource,
    engine: FederatedMetricEngine,
    points: PointStore,
    /// Scenario start, whole seconds in millis
    from: i64,
}

impl Harness {
    async fn new() -> Self {
        let from = 1_700_000_000_000;
        let clock = Arc::new(ManualClock::new(from));
        let registry = Arc::new(MetricIdRegistry::in_memory());
        let source = IndexSource::new(
            Arc::new(MemoryChangeStore::new()),
            registry.clone(),
            clock.clone(),
        );
        let engine = FederatedMetricEngine::new(source.clone(), DT).await.unwrap();
        Self {
            clock,
            registry,
            source,
            engine,
            points: PointStore::default(),
            from,
        }
    }

    fn now(&self) -> i64 {
        use crate::clock::Clock;
        self.clock.now_millis()
    }

    async fn mk_metric(&self, metric: &str) {
        self.registry.get_or_create_metric(metric).await.unwrap();
    }

    /// Engine that loads its own snapshot right now
    async fn concurrent_engine(&self) -> FederatedMetricEngine {
        FederatedMetricEngine::new(self.source.clone(), DT).await.unwrap()
    }

    async fn add_measure(&self, metric: &str, time: i64, value: i64, tags: &str) {
        let tags = parse_tags(tags).unwrap();
        let metric = self
            .engine
            .try_map_metric_to_sub_metric_at(metric, time, &tags)
            .await
            .unwrap();
        self.points.put(&metric, time, value, tags);
    }

    async fn split(&self, metric: &str, from_ms: i64, to_ms: i64, tags: &Tags) -> Vec<MetricQuery> {
        let query = MetricQuery::builder(metric)
            .start_time(from_ms / 1000)
            .end_time(to_ms / 1000)
            .tags(tags.clone())
            .build()
            .unwrap();
        self.engine.split(&query).await.unwrap()
    }
}

fn tags(s: &str) -> Tags {
    parse_tags(s).unwrap()
}

fn count_value(measures: &[Measure], value: i64) -> usize {
    measures.iter().filter(|m| m.value == value).count()
}

#[tokio::test]
async fn splitless() {
    let h = Harness::new().await;
    h.mk_metric("foo").await;

    h.add_measure("foo", h.now(), 1, "host=local").await;
    h.clock.advance(1_000);

    let queries = h.split("foo", h.from, h.now(), &Tags::new()).await;
    assert_eq!(queries.len(), 1);
    let measures = h.points.query(&queries);
    assert_eq!(measures.len(), 1);
    assert_eq!(measures[0].value, 1);
}

#[tokio::test]
async fn stale_engine_misses_fresh_sub_metric() {
    let h = Harness::new().await;
    h.mk_metric("foo").await;

    h.add_measure("foo", h.now(), 1, "host=local").await;
    h.clock.advance(1_000);

    h.source.add_index("foo", tags("cluster=a")).await.unwrap();
    let concurrent = h.concurrent_engine().await;
    let sub_metric = concurrent
        .try_map_metric_to_sub_metric_at("foo", h.now(), &tags("cluster=a"))
        .await
        .unwrap();
    assert_ne!(sub_metric, "foo");

    h.add_measure(&sub_metric, h.now(), 2, "cluster=a host=local").await;
    h.clock.advance(1_000);
    assert!(h.now() < h.from + DT);

    // The engine has not reloaded yet and still sees an unfederated metric
    let queries = h.split("foo", h.from, h.now(), &tags("cluster=a")).await;
    assert_eq!(queries.len(), 1);
    assert!(h.points.query(&queries).is_empty());
}

#[tokio::test]
async fn reloaded_engine_finds_fresh_sub_metric() {
    let h = Harness::new().await;
    h.mk_metric("foo").await;

    h.add_measure("foo", h.now(), 1, "host=local").await;
    h.clock.advance(1_000);

    h.source.add_index("foo", tags("cluster=a")).await.unwrap();
    let concurrent = h.concurrent_engine().await;
    let sub_metric = concurrent
        .try_map_metric_to_sub_metric_at("foo", h.now(), &tags("cluster=a"))
        .await
        .unwrap();
    assert_ne!(sub_metric, "foo");

    h.add_measure(&sub_metric, h.now(), 2, "cluster=a host=local").await;
    h.clock.advance(DT);
    assert!(h.now() >= h.from + DT);

    let queries = h.split("foo", h.from, h.now(), &tags("cluster=a")).await;
    assert_eq!(queries.len(), 2);
    let measures = h.points.query(&queries);
    assert_eq!(measures.len(), 1);
    assert_eq!(measures[0].value, 2);
}

#[tokio::test]
async fn points_follow_routing_across_reload() {
    let h = Harness::new().await;
    h.mk_metric("foo").await;

    h.add_measure("foo", h.now(), 1, "host=local").await;
    h.clock.advance(1_000);

    h.source.add_index("foo", tags("cluster=a")).await.unwrap();
    let sub_metric = h
        .engine
        .try_map_metric_to_sub_metric_at("foo", h.now(), &tags("cluster=a"))
        .await
        .unwrap();
    assert_eq!(sub_metric, "foo");
    h.add_measure(&sub_metric, h.now(), 2, "cluster=a host=local").await;
    h.clock.advance(DT);

    let sub_metric = h
        .engine
        .try_map_metric_to_sub_metric_at("foo", h.now(), &tags("cluster=a"))
        .await
        .unwrap();
    assert_eq!(sub_metric, "foo/cluster/a");
    h.add_measure(&sub_metric, h.now(), 3, "cluster=a host=local").await;
    h.clock.advance(1_000);

    let queries = h.split("foo", h.from, h.now(), &tags("cluster=a")).await;
    assert_eq!(queries.len(), 2);
    let measures = h.points.query(&queries);
    assert_eq!(measures.len(), 2);
    assert_eq!(count_value(&measures, 1), 0);
    assert_eq!(count_value(&measures, 2), 1);
    assert_eq!(count_value(&measures, 3), 1);
}

#[tokio::test]
async fn put_in_past_routes_by_point_time() {
    let h = Harness::new().await;
    h.mk_metric("foo").await;
    h.clock.advance(DT);

    h.source.add_index("foo", tags("cluster=a")).await.unwrap();
    h.clock.advance(DT);

    let t = tags("cluster=a host=local");
    let sub_metric = h
        .engine
        .try_map_metric_to_sub_metric_at("foo", h.from, &t)
        .await
        .unwrap();
    assert_eq!(sub_metric, "foo");
    h.add_measure(&sub_metric, h.from, 1, "cluster=a host=local").await;
    h.clock.advance(DT);

    let queries = h.split("foo", h.from, h.from + DT / 2, &tags("cluster=a")).await;
    assert_eq!(queries.len(), 1);
    let measures = h.points.query(&queries);
    assert_eq!(measures.len(), 1);
    assert_eq!(count_value(&measures, 1), 1);
}

#[tokio::test]
async fn untagged_query_fans_out_to_every_sub_metric() {
    let h = Harness::new().await;
    h.source.add_index("foo", tags("cluster=a")).await.unwrap();
    h.source.add_index("foo", tags("cluster=b")).await.unwrap();
    h.clock.advance(10 * DT);
    h.engine.refresh().await.unwrap();

    let queries = h.split("foo", h.now() - 1_000, h.now(), &Tags::new()).await;
    let mut names: Vec<&str> = queries.iter().map(|q| q.metric.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["foo", "foo/cluster/a", "foo/cluster/b"]);
}

#[tokio::test]
async fn interleaved_writes_are_read_exactly_once() {
    let h = Harness::new().await;
    h.mk_metric("foo").await;

    let mut tag_sets = vec!["host=local".to_string()];
    let mut tag_pos = 0;
    let mut expected: Vec<Measure> = Vec::new();
    let mut checked = 0;
    let mut value = 0;

    while h.now() - h.from < 30 * DT {
        if h.now() == h.from + 2 * DT {
            h.source.add_index("foo", tags("cluster=a")).await.unwrap();
            tag_sets.push("host=local cluster=a".to_string());
        }
        if h.now() == h.from + 10 * DT {
            h.source.add_index("foo", tags("cluster=b")).await.unwrap();
            tag_sets.push("host=local cluster=b".to_string());
        }

        tag_pos = (tag_pos + 1) % tag_sets.len();
        h.add_measure("foo", h.now(), value, &tag_sets[tag_pos]).await;
        expected.push(Measure {
            time: h.now() + DT,
            value,
            tags: tags(&tag_sets[tag_pos]),
        });

        if let Some(measure) = expected.get(checked) {
            if measure.time <= h.now() {
                let queries = h.split("foo", h.from, h.now(), &measure.tags).await;
                let measures = h.points.query(&queries);
                assert_eq!(
                    count_value(&measures, measure.value),
                    1,
                    "value {} with {:?}",
                    measure.value,
                    measure.tags
                );
                checked += 1;
            }
        }

        value += 1;
        h.clock.advance(1_000);
    }

    assert!(checked > 0);
}
