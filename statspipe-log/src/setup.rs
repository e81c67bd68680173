use std::str::FromStr;
use std::sync::Once;

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Controls the log format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise
    /// [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// The logging level parsed from configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Log only errors.
    Error,
    /// Log errors and warnings.
    Warn,
    /// Log errors, warnings, and general information.
    Info,
    /// Log debugging information.
    Debug,
    /// Log full auxiliary information.
    Trace,
}

impl LogLevel {
    fn level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Controls the logging system.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// The log level for statspipe.
    pub level: LogLevel,

    /// Controls the log output format.
    ///
    /// Defaults to [`LogFormat::Auto`], which detects the best format based
    /// on the TTY.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Auto,
        }
    }
}

/// Initializes the logging system based on the given config.
///
/// The `RUST_LOG` environment variable takes precedence over the configured
/// level and allows per-target directives.
pub fn init(config: &LogConfig) {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) => EnvFilter::from_str(&directives).unwrap_or_default(),
        Err(_) => EnvFilter::default().add_directive(config.level.level_filter().into()),
    };

    let format = match config.format {
        LogFormat::Auto if console::user_attended() => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        other => other,
    };

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Auto | LogFormat::Pretty => subscriber.pretty().init(),
        LogFormat::Simplified => subscriber.compact().with_ansi(false).init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

/// Initializes logging for tests.
///
/// Forwards all log output to the test writer and is safe to call multiple
/// times from different tests.
pub fn init_test() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::default().add_directive(LevelFilter::DEBUG.into()))
            .with_test_writer()
            .init();
    });
}
