use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use statspipe_config::Config;

/// A streaming statsd-style metrics aggregation pipeline.
///
/// Reads metric lines from standard input, aggregates them per flush
/// interval, and delivers the resulting buckets to the configured sinks.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Path to the YAML configuration file.
    ///
    /// Without a config file, built-in defaults apply: a ten second flush
    /// interval, all aggregators enabled, and a console sink.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Loads the configuration, falling back to defaults without a file.
    pub fn load_config(&self) -> anyhow::Result<Config> {
        match &self.config {
            Some(path) => Config::from_path(path)
                .with_context(|| format!("failed to load config from {}", path.display())),
            None => Ok(Config::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let cli = Cli::parse_from(["statspipe", "--config", "/etc/statspipe.yml"]);
        assert_eq!(cli.config.as_deref(), Some("/etc/statspipe.yml".as_ref()));

        let cli = Cli::parse_from(["statspipe"]);
        assert!(cli.config.is_none());
        assert_eq!(cli.load_config().unwrap().flush_interval_ms, 10_000);
    }
}
