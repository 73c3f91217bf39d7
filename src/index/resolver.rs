//! Metric name → physical ID resolution
//!
//! Queries against a sub-series need its binary ID, and a sub-series must
//! have one before any change routing to it becomes visible.

use crate::error::{FederationError, FederationResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Width of a metric ID on the wire, in bytes
pub const METRIC_ID_WIDTH: usize = 3;

/// Largest ID that fits in `METRIC_ID_WIDTH` bytes
const MAX_METRIC_ID: u32 = (1 << (8 * METRIC_ID_WIDTH as u32)) - 1;

/// Physical ID of a metric or sub-metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricId(pub u32);

impl MetricId {
    /// Big-endian encoding on `METRIC_ID_WIDTH` bytes
    pub fn to_bytes(self) -> [u8; METRIC_ID_WIDTH] {
        let b = self.0.to_be_bytes();
        [b[1], b[2], b[3]]
    }
}

impl std::fmt::Display for MetricId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.to_bytes() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Resolves metric names to physical IDs
#[async_trait]
pub trait IdResolver: Send + Sync {
    /// ID of an existing metric; `UnknownMetric` if none was assigned
    async fn get_metric(&self, name: &str) -> FederationResult<MetricId>;

    /// ID of `name`, assigning a fresh one if needed
    async fn get_or_create_metric(&self, name: &str) -> FederationResult<MetricId>;
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Names indexed by ID
    names: Vec<String>,
    /// Name to ID lookup
    name_to_id: HashMap<String, MetricId>,
}

/// ID registry, in memory or persisted as a JSON array of names
#[derive(Debug)]
pub struct MetricIdRegistry {
    state: RwLock<RegistryState>,
    path: Option<PathBuf>,
}

impl MetricIdRegistry {
    /// Registry that lives only as long as the process
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            path: None,
        }
    }

    /// Load from (or lazily create) a JSON file
    pub fn open(path: &Path) -> FederationResult<Self> {
        let mut state = RegistryState::default();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let names: Vec<String> = serde_json::from_str(&content)?;
            for (id, name) in names.into_iter().enumerate() {
                state.name_to_id.insert(name.clone(), MetricId(id as u32));
                state.names.push(name);
            }
        }

        Ok(Self {
            state: RwLock::new(state),
            path: Some(path.to_path_buf()),
        })
    }

    /// Number of assigned IDs
    pub async fn len(&self) -> usize {
        self.state.read().await.names.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Name assigned to `id`, if any
    pub async fn name_of(&self, id: MetricId) -> Option<String> {
        self.state.read().await.names.get(id.0 as usize).cloned()
    }

    fn save(&self, state: &RegistryState) -> FederationResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&state.names)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[async_trait]
impl IdResolver for MetricIdRegistry {
    async fn get_metric(&self, name: &str) -> FederationResult<MetricId> {
        self.state
            .read()
            .await
            .name_to_id
            .get(name)
            .copied()
            .ok_or_else(|| FederationError::UnknownMetric(name.to_string()))
    }

    async fn get_or_create_metric(&self, name: &str) -> FederationResult<MetricId> {
        let mut state = self.state.write().await;
        if let Some(&id) = state.name_to_id.get(name) {
            return Ok(id);
        }

        let next = state.names.len() as u32;
        if next > MAX_METRIC_ID {
            return Err(FederationError::Store(format!(
                "metric ID space exhausted, can't assign {}",
                name
            )));
        }

        let id = MetricId(next);
        state.names.push(name.to_string());
        state.name_to_id.insert(name.to_string(), id);

        if let Err(e) = self.save(&state) {
            state.names.pop();
            state.name_to_id.remove(name);
            return Err(e);
        }

        tracing::debug!(metric = name, id = %id, "Assigned metric ID");
        Ok(id)
    }
}
