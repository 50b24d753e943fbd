//! Process configuration.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{de, Deserialize, Deserializer};
use tracing::level_filters::LevelFilter;

/// Controls the log format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other).
    Auto,
    /// With colors.
    Pretty,
    /// Simplified log output.
    Simplified,
    /// Dump out JSON lines.
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the process.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "meshcache".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// This node's identity on the cluster.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// The address this node binds its RPC server to, and the address peers
    /// dial. Also the registration key suffix in the coordinator.
    pub addr: String,
    /// Optional human-readable node label used in log output.
    pub id: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            addr: "127.0.0.1:8001".into(),
            id: None,
        }
    }
}

/// The HTTP gateway listener.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host and port to bind the gateway to.
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            bind: "0.0.0.0:9000".into(),
        }
    }
}

/// Coordinator (etcd) connectivity and cadence.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// etcd endpoints.
    pub endpoints: Vec<String>,
    /// Registration lease time-to-live.
    #[serde(with = "humantime_serde")]
    pub lease_ttl: Duration,
    /// Interval between lease keep-alive refreshes.
    #[serde(with = "humantime_serde")]
    pub keepalive_interval: Duration,
    /// Interval between gateway membership polls.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            endpoints: vec!["http://127.0.0.1:2379".into()],
            lease_ttl: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// The replacement policy backing a cache group.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// Plain least-recently-used.
    Lru,
    /// LRU with a cold admission stage.
    LruK,
    /// Least-frequently-used with frequency buckets.
    Lfu,
    /// LFU with average-frequency decay.
    AvgLfu,
    /// Adaptive replacement.
    Arc,
}

/// Sizing and policy selection for the local cache of a group.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Total entries across all shards.
    pub capacity: usize,
    /// Number of independent shards.
    pub shards: usize,
    /// The replacement policy.
    pub policy: PolicyKind,
    /// Cold-stage capacity per shard (lru-k only).
    pub cold_capacity: usize,
    /// Touches before a key is promoted (lru-k and arc).
    pub promotion_threshold: u64,
    /// Average frequency triggering a decay pass (avg-lfu only).
    pub max_average_frequency: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            capacity: 1024,
            shards: 8,
            policy: PolicyKind::LruK,
            cold_capacity: 256,
            promotion_threshold: 2,
            max_average_frequency: 10,
        }
    }
}

/// The top-level configuration, deserialized from a YAML file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The service name all nodes register under in the coordinator.
    pub service_name: String,
    /// This node's identity.
    pub node: NodeConfig,
    /// The gateway listener.
    pub gateway: GatewayConfig,
    /// Coordinator connectivity.
    pub coordinator: CoordinatorConfig,
    /// Local cache sizing and policy.
    pub cache: CacheSettings,
    /// Logging.
    pub logging: Logging,
    /// Metrics.
    pub metrics: Metrics,
}

impl Config {
    /// Loads the configuration from the given path, or the built-in defaults
    /// when no path is given.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let file = fs::File::open(path)
                    .with_context(|| format!("failed to open config file {}", path.display()))?;
                serde_yaml::from_reader(file).context("failed to parse YAML config file")?
            }
            None => Config::default(),
        };
        if config.service_name.is_empty() {
            config.service_name = "meshcache".into();
        }
        Ok(config)
    }
}

fn deserialize_level_filter<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    text.parse().map_err(de::Error::custom)
}
