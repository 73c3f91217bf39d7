//! Federation Index
//!
//! Persistent routing history and the snapshots built from it:
//!
//! - **ChangeStore**: scan/put capability (in-memory or JSON file)
//! - **IdResolver**: metric name → physical ID registry
//! - **Index**: immutable, periodically rebuilt snapshot of all histories
//! - **IndexSource**: loads snapshots, applies ADD/REMOVE edits
//!
//! # Architecture
//!
//! ```text
//!   ChangeStore ──scan──→ IndexSource::load ──→ Arc<Index> (shared, read-only)
//!        ↑                                            │
//!        └──put_with_retry── add_index/remove_index   └─→ FederatedMetricEngine
//! ```

mod resolver;
mod snapshot;
mod source;
mod store;

pub use resolver::{IdResolver, MetricId, MetricIdRegistry, METRIC_ID_WIDTH};
pub use snapshot::Index;
pub use source::IndexSource;
pub use store::{put_with_retry, ChangeStore, JsonFileStore, MemoryChangeStore, RetryConfig};
