//! Change Stores - persistence for routing history
//!
//! One record per logical metric, holding its full `ChangeLog`. The index
//! only needs two capabilities from a backend: scan everything, and replace
//! one metric's log.
//!
//! - `MemoryChangeStore`: in-process map, used by tests and embedders
//! - `JsonFileStore`: a single JSON document on local disk
//!
//! Writes go through `put_with_retry`, which retries transient failures
//! with exponential backoff and reports exhaustion as a hard error.

use crate::error::{FederationError, FederationResult};
use crate::model::ChangeLog;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Narrow persistence capability the index is loaded from
#[async_trait]
pub trait ChangeStore: Send + Sync {
    /// Read every metric's routing history
    async fn scan(&self) -> FederationResult<HashMap<String, ChangeLog>>;

    /// Replace the routing history of `metric`
    async fn put(&self, metric: &str, changes: &ChangeLog) -> FederationResult<()>;

    /// Read one metric's routing history, `None` if it was never federated
    async fn get(&self, metric: &str) -> FederationResult<Option<ChangeLog>> {
        Ok(self.scan().await?.remove(metric))
    }
}

/// Bounded exponential backoff for store writes
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one (default: 6)
    pub max_attempts: u32,
    /// Delay after the first failure, doubled after each further one (default: 800ms)
    pub initial_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(800),
        }
    }
}

/// Persist `changes` for `metric`, retrying transient store failures
///
/// Non-retryable errors are returned immediately. Once the attempt budget
/// is used up the last failure is wrapped in `RetriesExhausted`; the write
/// must then be treated as not having happened.
pub async fn put_with_retry(
    store: &dyn ChangeStore,
    metric: &str,
    changes: &ChangeLog,
    retry: &RetryConfig,
) -> FederationResult<()> {
    let max_attempts = retry.max_attempts.max(1);
    let mut delay = retry.initial_backoff;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match store.put(metric, changes).await {
            Ok(()) => return Ok(()),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                tracing::error!(metric, attempts = attempt, error = %e, "Put failed, giving up");
                return Err(FederationError::RetriesExhausted {
                    metric: metric.to_string(),
                    attempts: attempt,
                    last_error: e.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(
                    metric,
                    attempts_left = max_attempts - attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Put failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }
}

/// In-memory change store
#[derive(Debug, Default)]
pub struct MemoryChangeStore {
    records: RwLock<HashMap<String, ChangeLog>>,
    /// Number of upcoming puts that fail with a transient error
    failing_puts: AtomicU32,
    put_calls: AtomicU32,
}

impl MemoryChangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` puts fail with a retryable store error
    pub fn inject_put_failures(&self, count: u32) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    /// Number of put attempts seen so far, failed ones included
    pub fn put_calls(&self) -> u32 {
        self.put_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChangeStore for MemoryChangeStore {
    async fn scan(&self) -> FederationResult<HashMap<String, ChangeLog>> {
        Ok(self.records.read().await.clone())
    }

    async fn get(&self, metric: &str) -> FederationResult<Option<ChangeLog>> {
        Ok(self.records.read().await.get(metric).cloned())
    }

    async fn put(&self, metric: &str, changes: &ChangeLog) -> FederationResult<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(FederationError::Store(format!(
                "injected put failure for {}",
                metric
            )));
        }

        self.records
            .write()
            .await
            .insert(metric.to_string(), changes.clone());
        Ok(())
    }
}

/// Serialization format for the JSON file store
#[derive(Serialize, Deserialize, Default)]
struct IndexFileData {
    /// Version for future compatibility
    version: u32,
    /// metric → routing history
    metrics: BTreeMap<String, ChangeLog>,
}

/// Change store backed by one JSON file
///
/// Every put rewrites the whole document through a temp file and rename,
/// so readers never see a torn file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store under `data_dir`
    pub fn new(data_dir: &Path) -> FederationResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            path: data_dir.join("federation_index.json"),
            write_lock: Mutex::new(()),
        })
    }

    /// Get the persistence file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> FederationResult<IndexFileData> {
        if !self.path.exists() {
            return Ok(IndexFileData {
                version: 1,
                metrics: BTreeMap::new(),
            });
        }

        let file = File::open(&self.path).map_err(|e| {
            FederationError::Store(format!("failed to open {:?}: {}", self.path, e))
        })?;
        let data: IndexFileData = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            FederationError::Consistency(format!("corrupted index file {:?}: {}", self.path, e))
        })?;
        Ok(data)
    }

    fn write_file(&self, data: &IndexFileData) -> FederationResult<()> {
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, data)?;
            writer.flush()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl ChangeStore for JsonFileStore {
    async fn scan(&self) -> FederationResult<HashMap<String, ChangeLog>> {
        Ok(self.read_file()?.metrics.into_iter().collect())
    }

    async fn put(&self, metric: &str, changes: &ChangeLog) -> FederationResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut data = self.read_file()?;
        data.version = 1;
        data.metrics.insert(metric.to_string(), changes.clone());
        self.write_file(&data)
    }
}
