//! Chronicle Federation CLI
//!
//! Operator tool for federation rules:
//! - Add or remove a sub-series of a metric
//! - List federated metrics
//! - Show where a point would be routed and how a query is split

use anyhow::{bail, Context};
use chronicle_federation::config::generate_default_config;
use chronicle_federation::model::parse_tag;
use chronicle_federation::{
    AggregationFunc, Config, FederatedMetricEngine, IndexSource, JsonFileStore, MetricIdRegistry,
    MetricQuery, SystemClock, Tags,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fedctl")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Manage metric federation rules")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: searched in the usual locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory, overrides the config
    #[arg(long, global = true)]
    pub data_dir: Option<String>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Route points of a metric carrying these tags to a new sub-series
    Add {
        metric: String,
        /// Tags in key=value format
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Stop routing to the sub-series selected by these tags
    Remove {
        metric: String,
        /// Tags in key=value format
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// List federated metrics and their sub-series
    List,

    /// Show which physical series a point would be written to
    Route {
        metric: String,
        /// Tags in key=value format
        tags: Vec<String>,
        /// Point timestamp, Unix seconds (default: now)
        #[arg(long)]
        at: Option<i64>,
    },

    /// Show the physical queries a query is split into
    Split {
        metric: String,
        /// Tags in key=value format; `*` or `a|b` values group by
        tags: Vec<String>,
        /// Start, Unix seconds
        #[arg(short, long)]
        start: i64,
        /// End, Unix seconds (default: now)
        #[arg(short, long)]
        end: Option<i64>,
        /// Aggregation function (sum, min, max, avg, dev)
        #[arg(short, long, default_value = "sum")]
        aggregator: String,
        /// Downsample as <seconds>-<aggregator>, e.g. 60-avg
        #[arg(short, long)]
        downsample: Option<String>,
        /// Query the rate of change
        #[arg(long)]
        rate: bool,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config.store.data_dir = data_dir.clone();
    }
    init_logging(&config);

    match cli.command {
        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("writing {:?}", path))?;
                    println!("Wrote default config to {:?}", path);
                }
                None => print!("{}", content),
            }
        }

        Commands::Add { metric, tags } => {
            let engine = open_engine(&config).await?;
            let change = engine.add_index(&metric, parse_args(&tags)?).await?;
            println!(
                "Added {} at {}",
                change.sub_metric_name(&metric),
                format_millis(change.timestamp)
            );
        }

        Commands::Remove { metric, tags } => {
            let engine = open_engine(&config).await?;
            let change = engine.remove_index(&metric, parse_args(&tags)?).await?;
            println!(
                "Removed {} at {}",
                change.sub_metric_name(&metric),
                format_millis(change.timestamp)
            );
        }

        Commands::List => {
            let engine = open_engine(&config).await?;
            let metrics = engine.list().await?;

            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&metrics)?);
            } else if metrics.is_empty() {
                println!("No federated metrics");
            } else {
                for metric in &metrics {
                    println!("Federated metric: {}", metric.metric());
                    for sub_metric in metric.sub_metrics() {
                        println!("\tsubmetric: {}", sub_metric.name);
                        for (key, value) in &sub_metric.tags {
                            println!("\t\t{}={}", key, value);
                        }
                    }
                }
            }
        }

        Commands::Route { metric, tags, at } => {
            let engine = open_engine(&config).await?;
            let tags = parse_args(&tags)?;
            let routed = match at {
                Some(secs) => {
                    engine
                        .try_map_metric_to_sub_metric_at(&metric, secs.saturating_mul(1000), &tags)
                        .await?
                }
                None => engine.try_map_metric_to_sub_metric(&metric, &tags).await?,
            };
            println!("{}", routed);
        }

        Commands::Split {
            metric,
            tags,
            start,
            end,
            aggregator,
            downsample,
            rate,
        } => {
            let engine = open_engine(&config).await?;

            let mut builder = MetricQuery::builder(&metric)
                .start_time(start)
                .tags(parse_args(&tags)?)
                .aggregator(aggregator.parse()?)
                .rate(rate);
            if let Some(end) = end {
                builder = builder.end_time(end);
            }
            if let Some(arg) = downsample {
                let (interval, agg) = parse_downsample(&arg)?;
                builder = builder.downsample(interval, agg);
            }
            let query = builder.build()?;

            let parts = engine.split(&query).await?;
            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&parts)?);
            } else {
                println!("{} split into {} part(s)", query, parts.len());
                for part in &parts {
                    let id = part
                        .metric_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("  [{}] {}", id, part);
                }
            }
        }
    }

    Ok(())
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "chronicle_federation={},fedctl={}",
            config.logging.level, config.logging.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn open_engine(config: &Config) -> anyhow::Result<FederatedMetricEngine> {
    let data_dir = config.store.data_path();
    let store = JsonFileStore::new(&data_dir)
        .with_context(|| format!("opening routing store in {:?}", data_dir))?;
    let registry = MetricIdRegistry::open(&config.store.registry_path())
        .context("opening metric ID registry")?;

    let source = IndexSource::new(Arc::new(store), Arc::new(registry), Arc::new(SystemClock))
        .with_retry(config.store.retry());
    Ok(FederatedMetricEngine::new(source, config.federation.cache_timeout_ms()).await?)
}

fn parse_args(args: &[String]) -> anyhow::Result<Tags> {
    let mut tags = Tags::new();
    for arg in args {
        parse_tag(&mut tags, arg)?;
    }
    Ok(tags)
}

/// Parse `<seconds>-<aggregator>`
fn parse_downsample(arg: &str) -> anyhow::Result<(u32, AggregationFunc)> {
    let Some((interval, agg)) = arg.split_once('-') else {
        bail!("invalid downsample {:?}, expected <seconds>-<aggregator>", arg);
    };
    let interval = interval
        .parse()
        .with_context(|| format!("invalid downsample interval {:?}", interval))?;
    Ok((interval, agg.parse()?))
}

fn format_millis(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        .unwrap_or_else(|| ms.to_string())
}
