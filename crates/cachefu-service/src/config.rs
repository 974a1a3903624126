use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the service.
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
            prefix: "cachefu".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Fine-tuning for the object cache both the loader and the HTTP response
/// store are built on.
#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheTuning {
    /// Time-to-live of cache entries, counted from the last write.
    ///
    /// Applies to the memory tier directly and to disk entries via their
    /// file mtime. `None` disables expiration.
    #[serde(with = "humantime_serde")]
    pub ttl: Option<Duration>,

    /// Sizing hint for the in-memory tier.
    pub initial_capacity: usize,

    /// Expected number of parallel accessors. Advisory only.
    pub concurrency_hint: usize,
}

impl Default for CacheTuning {
    fn default() -> Self {
        Self {
            ttl: Some(Duration::from_secs(3600)),
            initial_capacity: 50,
            concurrency_hint: 4,
        }
    }
}

/// Various timeouts for the HTTP client.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Timeouts {
    /// The timeout for establishing a connection.
    #[serde(with = "humantime_serde")]
    pub connect: Duration,
    /// Global timeout for one request attempt, unless overridden per call.
    #[serde(with = "humantime_serde")]
    pub total: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            total: Duration::from_secs(30),
        }
    }
}

/// Fine-tuning the HTTP request layer.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Default number of retries per request. Clamped to the hard ceiling
    /// of [`MAX_RETRIES`](crate::http::MAX_RETRIES) like any caller input.
    pub retries: isize,
    /// Timeouts applied to every request unless overridden per call.
    pub timeouts: Timeouts,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            timeouts: Timeouts::default(),
        }
    }
}

/// Fine-tuning the remote loader dispatcher.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct LoaderConfig {
    /// Maximum number of fetch jobs running in parallel.
    pub concurrency: usize,
    /// Number of retries per fetch job.
    pub retries: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            retries: 3,
        }
    }
}

/// Service configuration, loadable from YAML.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which directory to use when caching. Default is not to cache on disk.
    pub cache_dir: Option<PathBuf>,

    /// Object cache tuning.
    pub cache: CacheTuning,

    /// HTTP layer tuning.
    pub http: HttpConfig,

    /// Remote loader tuning.
    pub loader: LoaderConfig,

    /// Logging configuration.
    pub logging: Logging,

    /// Metrics configuration.
    pub metrics: Metrics,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_dir: None,
            cache: CacheTuning::default(),
            http: HttpConfig::default(),
            loader: LoaderConfig::default(),
            logging: Logging::default(),
            metrics: Metrics::default(),
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(reader: impl std::io::Read) -> Result<Self> {
        serde_yaml::from_reader(reader).context("failed to parse YAML")
    }

    /// The disk root for caches, if disk caching is configured.
    pub fn cache_root(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }
}

fn deserialize_level_filter<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse().map_err(de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.loader.concurrency, 3);
        assert_eq!(cfg.http.retries, 3);
        assert!(cfg.cache_dir.is_none());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
cache_dir: /tmp/cachefu
cache:
  ttl: 30m
  initial_capacity: 100
http:
  retries: 2
  timeouts:
    connect: 5s
    total: 20s
loader:
  concurrency: 5
logging:
  level: debug
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.cache_dir, Some(PathBuf::from("/tmp/cachefu")));
        assert_eq!(cfg.cache.ttl, Some(Duration::from_secs(1800)));
        assert_eq!(cfg.cache.initial_capacity, 100);
        assert_eq!(cfg.http.retries, 2);
        assert_eq!(cfg.http.timeouts.connect, Duration::from_secs(5));
        assert_eq!(cfg.loader.concurrency, 5);
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        // unspecified sections keep their defaults
        assert_eq!(cfg.loader.retries, 3);
    }
}
