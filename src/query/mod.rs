//! Federation Queries
//!
//! Query descriptions passed into and out of the splitter:
//!
//! - **MetricQuery**: one metric over a time window, with aggregation parameters
//! - **QueryBuilder**: validated construction, group-by extraction from tag values
//! - **dedup**: merging of same-metric windows after splitting
//!
//! # Example
//!
//! ```rust,ignore
//! use chronicle_federation::query::{AggregationFunc, MetricQuery};
//!
//! let query = MetricQuery::builder("requests")
//!     .start_time(1_700_000_000)
//!     .tags(parse_tags("cluster=a")?)
//!     .downsample(60, AggregationFunc::Avg)
//!     .build()?;
//!
//! for part in engine.split(&query).await? {
//!     println!("{}", part);
//! }
//! ```

mod dedup;
mod types;

pub use dedup::{dedup_all, dedup_track};
pub use types::{AggregationFunc, Downsample, MetricQuery, QueryBuilder};
