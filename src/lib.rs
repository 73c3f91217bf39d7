//! # Chronicle Federation
//!
//! Metric federation for the Chronicle time-series database: a logical
//! metric can be split into physical sub-series over time without breaking
//! historical queries or ongoing ingestion.
//!
//! ## Features
//!
//! - **Versioned routing**: every ADD/REMOVE of a sub-series is kept, so the
//!   rules in force at any instant can be reconstructed
//! - **Query splitting**: one logical query becomes the minimal set of
//!   physical queries, each scoped to the window its series was authoritative
//! - **Write routing**: points go to the sub-series their tags and timestamp
//!   select
//! - **Cached index**: a copy-on-write snapshot refreshed on a TTL
//!
//! ## Modules
//!
//! - [`model`]: Change, FederatedMetric, SubMetric and Era value types
//! - [`index`]: snapshot, stores, ID resolver and administrative edits
//! - [`query`]: query description, builder and interval merging
//! - [`engine`]: the federated metric engine
//! - [`ingest`]: time-sharded write routing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chronicle_federation::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = IndexSource::new(
//!         Arc::new(MemoryChangeStore::new()),
//!         Arc::new(MetricIdRegistry::in_memory()),
//!         Arc::new(SystemClock),
//!     );
//!     let engine = FederatedMetricEngine::new(source, 600_000).await?;
//!
//!     // Route cluster=a points of "requests" to their own series
//!     engine.add_index("requests", parse_tags("cluster=a")?).await?;
//!     engine.refresh().await?;
//!
//!     let query = MetricQuery::builder("requests")
//!         .start_time(1_700_000_000)
//!         .tags(parse_tags("cluster=a")?)
//!         .build()?;
//!     for part in engine.split(&query).await? {
//!         println!("{}", part);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod ingest;
pub mod model;
pub mod query;

// Re-export top-level types for convenience
pub use clock::{Clock, ManualClock, SystemClock};

pub use config::{Config, ConfigError, FederationConfig, LoggingConfig, StoreConfig};

pub use engine::{EngineStats, FederatedMetricEngine};

pub use error::{FederationError, FederationResult};

pub use index::{
    ChangeStore, IdResolver, Index, IndexSource, JsonFileStore, MemoryChangeStore, MetricId,
    MetricIdRegistry, RetryConfig,
};

pub use ingest::{DataPoint, PointValue, ShardedSeries};

pub use model::{parse_tags, Change, ChangeLog, ChangeOp, Era, FederatedMetric, SubMetric, Tags};

pub use query::{AggregationFunc, MetricQuery, QueryBuilder};
