//! Metric queries
//!
//! A `MetricQuery` names one logical (or, after splitting, physical) metric
//! over a time window in Unix seconds, plus the aggregation parameters that
//! the splitter carries through untouched.
//!
//! # Example
//!
//! ```rust,ignore
//! let query = MetricQuery::builder("requests")
//!     .start_time(1_700_000_000)
//!     .end_time(1_700_003_600)
//!     .tags(parse_tags("cluster=a host=*")?)
//!     .aggregator(AggregationFunc::Sum)
//!     .build()?;
//! // cluster=a filters, host=* groups
//! ```

use crate::error::{FederationError, FederationResult};
use crate::index::MetricId;
use crate::model::{validate_string, Tags};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregation function applied across series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AggregationFunc {
    #[default]
    Sum,
    Min,
    Max,
    Avg,
    /// Standard deviation
    Dev,
}

impl std::str::FromStr for AggregationFunc {
    type Err = FederationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "avg" | "average" => Ok(Self::Avg),
            "dev" => Ok(Self::Dev),
            other => Err(FederationError::Validation(format!(
                "unknown aggregator: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for AggregationFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sum => write!(f, "sum"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
            Self::Avg => write!(f, "avg"),
            Self::Dev => write!(f, "dev"),
        }
    }
}

/// Downsampling applied to each series before aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Downsample {
    /// Bucket width in seconds, strictly positive
    pub interval_secs: u32,
    pub aggregator: AggregationFunc,
}

/// One query against one metric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricQuery {
    /// Metric name (logical before splitting, physical after)
    pub metric: String,
    /// Resolved ID of `metric`, once known
    #[serde(default)]
    pub metric_id: Option<MetricId>,
    /// Inclusive start, Unix seconds
    pub start_time: i64,
    /// Inclusive end, Unix seconds; `None` means "now"
    pub end_time: Option<i64>,
    /// Exact-match tag filters
    #[serde(default)]
    pub tags: Tags,
    /// Tag keys to group results by
    #[serde(default)]
    pub group_bys: Vec<String>,
    /// For group-by keys restricted to specific values: key → values
    #[serde(default)]
    pub group_by_values: BTreeMap<String, Vec<String>>,
    /// Use rate of change instead of raw values
    #[serde(default)]
    pub rate: bool,
    #[serde(default)]
    pub aggregator: AggregationFunc,
    #[serde(default)]
    pub downsample: Option<Downsample>,
}

impl MetricQuery {
    /// Start building a query for `metric`
    pub fn builder(metric: impl Into<String>) -> QueryBuilder {
        QueryBuilder::new(metric)
    }

    /// Reject queries no execution path can serve
    pub fn validate(&self) -> FederationResult<()> {
        validate_string("metric name", &self.metric)?;
        check_timestamp("start time", self.start_time)?;

        if let Some(end) = self.end_time {
            check_timestamp("end time", end)?;
            if self.start_time >= end {
                return Err(FederationError::Validation(format!(
                    "start time ({}) is greater than or equal to end time: {}",
                    self.start_time, end
                )));
            }
        }

        if let Some(ds) = &self.downsample {
            if ds.interval_secs == 0 {
                return Err(FederationError::Validation(
                    "downsample interval not > 0".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl std::fmt::Display for MetricQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.aggregator, self.metric)?;
        if !self.tags.is_empty() {
            let tags: Vec<String> = self.tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            write!(f, "{{{}}}", tags.join(","))?;
        }
        match self.end_time {
            Some(end) => write!(f, " [{}, {}]", self.start_time, end),
            None => write!(f, " [{}, now]", self.start_time),
        }
    }
}

/// Timestamps are unsigned 32-bit seconds on the wire
fn check_timestamp(what: &str, ts: i64) -> FederationResult<()> {
    if !(0..=u32::MAX as i64).contains(&ts) {
        return Err(FederationError::Validation(format!(
            "invalid {}: {}",
            what, ts
        )));
    }
    Ok(())
}

/// Builder for `MetricQuery`
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    query: MetricQuery,
}

impl QueryBuilder {
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            query: MetricQuery {
                metric: metric.into(),
                metric_id: None,
                start_time: 0,
                end_time: None,
                tags: Tags::new(),
                group_bys: Vec::new(),
                group_by_values: BTreeMap::new(),
                rate: false,
                aggregator: AggregationFunc::default(),
                downsample: None,
            },
        }
    }

    pub fn metric_id(mut self, id: MetricId) -> Self {
        self.query.metric_id = Some(id);
        self
    }

    /// Start of the window, Unix seconds
    pub fn start_time(mut self, secs: i64) -> Self {
        self.query.start_time = secs;
        self
    }

    /// End of the window, Unix seconds
    pub fn end_time(mut self, secs: i64) -> Self {
        self.query.end_time = Some(secs);
        self
    }

    /// Set tags, splitting group-bys from filters
    ///
    /// A value of `*` groups by every value of that key; `a|b|c` groups by
    /// the listed values only. Both are removed from the filter tags, so
    /// they never pin a query to a sub-metric.
    pub fn tags(mut self, tags: Tags) -> Self {
        for (key, value) in tags {
            if value == "*" {
                self.query.group_bys.push(key);
            } else if value.get(1..).is_some_and(|rest| rest.contains('|')) {
                let values = value
                    .split('|')
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .collect();
                self.query.group_bys.push(key.clone());
                self.query.group_by_values.insert(key, values);
            } else {
                self.query.tags.insert(key, value);
            }
        }
        self.query.group_bys.sort();
        self
    }

    pub fn rate(mut self, rate: bool) -> Self {
        self.query.rate = rate;
        self
    }

    pub fn aggregator(mut self, aggregator: AggregationFunc) -> Self {
        self.query.aggregator = aggregator;
        self
    }

    pub fn downsample(mut self, interval_secs: u32, aggregator: AggregationFunc) -> Self {
        self.query.downsample = Some(Downsample {
            interval_secs,
            aggregator,
        });
        self
    }

    /// Validate and return the query
    pub fn build(self) -> FederationResult<MetricQuery> {
        self.query.validate()?;
        Ok(self.query)
    }
}
