//! Federation Model
//!
//! Immutable value types describing routing history:
//!
//! - **Change / ChangeLog**: ADD/REMOVE edits, the persisted source of truth
//! - **SubMetric / FederatedMetric**: routing rules at one instant
//! - **Era**: a time window with fixed routing rules
//! - **tags**: tag sets, parsing and name validation
//!
//! # Derivation
//!
//! ```text
//! ChangeLog ──replay──→ FederatedMetric (head state)
//!     └──────fold────→ [Era, Era, ...]  (full history)
//! ```

mod change;
mod era;
mod federated;
mod tags;

pub use change::{sub_metric_name, Change, ChangeLog, ChangeOp};
pub use era::{Era, BEGINNING_OF_TIME};
pub use federated::{FederatedMetric, SubMetric};
pub use tags::{check_metric_and_tags, parse_tag, parse_tags, validate_string, Tags, MAX_NUM_TAGS};
