use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use statspipe_log::LogConfig;

/// Indicates config related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to open the file at the given path.
    #[error("could not open config file {path:?}")]
    CouldNotOpenFile {
        /// The path that failed to open.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the file as YAML.
    #[error("could not parse yaml config file {path:?}")]
    BadYaml {
        /// The path that failed to parse.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_yaml::Error,
    },
}

/// Controls the statsd client for statspipe's own internal metrics.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct StatsdConfig {
    /// Whether to report internal metrics. Defaults to `false`.
    pub enabled: bool,
    /// Host and port of the statsd endpoint.
    pub host: String,
    /// Prefix prepended to every internal metric name.
    pub prefix: String,
}

impl Default for StatsdConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1:8125".to_owned(),
            prefix: "statspipe".to_owned(),
        }
    }
}

/// A percentile computed by the timers aggregator.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PercentileConfig {
    /// The percentile threshold in the range `0..=100`.
    pub percentile: u8,
    /// Optional alias used in the emitted entry name instead of the default
    /// `p<percentile>`.
    #[serde(default)]
    pub alias: Option<String>,
}

/// Settings for the counters aggregator.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CountersConfig {
    /// Namespace prefix for counter metrics.
    pub namespace: String,
}

impl Default for CountersConfig {
    fn default() -> Self {
        Self {
            namespace: "stats.counters".to_owned(),
        }
    }
}

/// Settings for the gauges aggregator.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct GaugesConfig {
    /// Namespace prefix for gauge metrics.
    pub namespace: String,
    /// Removes gauges with a value of exactly zero after a flush.
    ///
    /// Non-zero gauges persist across flushes until overwritten.
    pub remove_zero_gauges: bool,
}

impl Default for GaugesConfig {
    fn default() -> Self {
        Self {
            namespace: "stats.gauges".to_owned(),
            remove_zero_gauges: false,
        }
    }
}

/// Settings for the timers aggregator and its percentile companions.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TimersConfig {
    /// Namespace prefix for timer metrics.
    pub namespace: String,
    /// Also emit the sum of squares per metric name.
    pub sum_squares: bool,
    /// Maximum number of raw samples retained per metric name and window.
    ///
    /// Samples beyond this capacity are dropped for the remainder of the
    /// window.
    pub reservoir_capacity: usize,
    /// Percentiles to compute, each in its own aggregator.
    pub percentiles: Vec<PercentileConfig>,
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            namespace: "stats.timers".to_owned(),
            sum_squares: false,
            reservoir_capacity: 1000,
            percentiles: vec![PercentileConfig {
                percentile: 90,
                alias: None,
            }],
        }
    }
}

/// Configures the set of aggregators loaded at startup.
///
/// A `None` section disables that aggregator; the raw passthrough is always
/// active.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregatorsConfig {
    /// Counter aggregation.
    pub counters: Option<CountersConfig>,
    /// Gauge aggregation.
    pub gauges: Option<GaugesConfig>,
    /// Timer aggregation including percentiles.
    pub timers: Option<TimersConfig>,
}

impl AggregatorsConfig {
    /// The default set with all aggregators enabled.
    pub fn all() -> Self {
        Self {
            counters: Some(CountersConfig::default()),
            gauges: Some(GaugesConfig::default()),
            timers: Some(TimersConfig::default()),
        }
    }
}

/// Settings for a single output sink.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Prints rendered buckets to standard output.
    Console,
    /// Forwards rendered lines to a peer statspipe instance over TCP.
    Forward(ForwardConfig),
}

/// Settings for the peer forwarding sink.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Hostname of the peer.
    pub host: String,
    /// TCP port of the peer.
    pub port: u16,
    /// Number of retry attempts per batch before it is dropped.
    pub retries: u32,
    /// Delay between retry attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// Enables gzip compression of large payloads.
    pub enable_compression: bool,
    /// Payloads at or above this size in bytes are compressed.
    pub compression_threshold: usize,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 12001,
            retries: 1,
            retry_delay_ms: 1000,
            enable_compression: true,
            compression_threshold: 350,
        }
    }
}

impl ForwardConfig {
    /// Returns the delay between retry attempts.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// The statspipe configuration root.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub logging: LogConfig,
    /// Internal metric reporting settings.
    pub metrics: StatsdConfig,
    /// Interval between flush ticks in milliseconds.
    pub flush_interval_ms: u64,
    /// Graceful shutdown timeout in seconds.
    pub shutdown_timeout_secs: u64,
    /// The aggregators to load.
    pub aggregators: AggregatorsConfig,
    /// The sinks receiving flushed buckets.
    pub sinks: Vec<SinkConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LogConfig::default(),
            metrics: StatsdConfig::default(),
            flush_interval_ms: 10_000,
            shutdown_timeout_secs: 10,
            aggregators: AggregatorsConfig::all(),
            sinks: vec![SinkConfig::Console],
        }
    }
}

impl Config {
    /// Loads the config from a YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::CouldNotOpenFile {
            path: path.to_owned(),
            source,
        })?;

        serde_yaml::from_str(&contents).map_err(|source| ConfigError::BadYaml {
            path: path.to_owned(),
            source,
        })
    }

    /// Returns the interval between flush ticks.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Returns the graceful shutdown timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.flush_interval(), Duration::from_secs(10));
        assert!(config.aggregators.counters.is_some());
        assert!(matches!(config.sinks.as_slice(), [SinkConfig::Console]));
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
flush_interval_ms: 500
aggregators:
  counters:
    namespace: "app.counters"
  timers:
    sum_squares: true
    percentiles:
      - percentile: 50
      - percentile: 98
        alias: "super"
sinks:
  - kind: console
  - kind: forward
    host: "10.0.0.2"
    port: 12001
    compression_threshold: 512
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.flush_interval_ms, 500);

        let counters = config.aggregators.counters.unwrap();
        assert_eq!(counters.namespace, "app.counters");

        // Gauges were not mentioned, so the section stays disabled.
        assert!(config.aggregators.gauges.is_none());

        let timers = config.aggregators.timers.unwrap();
        assert!(timers.sum_squares);
        assert_eq!(timers.reservoir_capacity, 1000);
        assert_eq!(timers.percentiles.len(), 2);
        assert_eq!(timers.percentiles[1].alias.as_deref(), Some("super"));

        match &config.sinks[1] {
            SinkConfig::Forward(forward) => {
                assert_eq!(forward.host, "10.0.0.2");
                assert_eq!(forward.compression_threshold, 512);
                assert_eq!(forward.retries, 1);
            }
            other => panic!("unexpected sink {other:?}"),
        }
    }
}
