//! Federation Engine
//!
//! The read side of federation, used by query execution and ingestion:
//!
//! - **FederatedMetricEngine**: cached index, query splitting, write routing
//! - **split**: sub-metric selection and per-era query specialisation
//!
//! # Split
//!
//! ```text
//! query(foo, cluster=a, [t0, t1])
//!   eras overlapping [t0 - 2·ttl, t1]
//!     era (-∞, tA)   → foo            [t0, tA + 2·ttl]
//!     era [tA, +∞)   → foo/cluster/a  [tA, t1]
//!   merge windows per physical metric
//! ```

mod federated;
mod split;

#[cfg(test)]
mod scenarios;

pub use federated::{EngineStats, FederatedMetricEngine};
pub use split::{select_sub_metrics, specialise};
