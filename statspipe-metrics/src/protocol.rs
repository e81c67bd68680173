use std::fmt;

use serde::{Deserialize, Serialize};

/// An error returned when a metric line cannot be parsed.
///
/// Parse errors are not fatal: the parser wraps them into
/// [`Message::Invalid`], which is counted and logged while the pipeline
/// continues.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseError {
    /// The line is missing the `name:value` separator.
    #[error("missing ':' separator")]
    MissingValueSeparator,
    /// The line is missing the `value|type` separator.
    #[error("missing '|' separator")]
    MissingTypeSeparator,
    /// The metric name is empty.
    #[error("empty metric name")]
    EmptyName,
    /// The value is not a finite number.
    #[error("invalid value: {0:?}")]
    InvalidValue(String),
    /// The type token is not one of `c`, `g`, `ms` or `r`.
    #[error("unknown metric type: {0:?}")]
    UnknownType(String),
    /// The counter sample rate is not in the range `(0, 1]`.
    #[error("invalid sample rate: {0:?}")]
    InvalidSampleRate(String),
}

/// The routing kind of a [`Message`].
///
/// Invalid messages have no kind; they are counted by the parser and never
/// reach the router.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// A counter increment.
    Counter,
    /// A gauge value.
    Gauge,
    /// A timing sample in milliseconds.
    Timing,
    /// A raw line passed through unaggregated.
    Raw,
}

impl MessageKind {
    /// The lowercase name of the kind, used in logs and metric tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Timing => "timing",
            Self::Raw => "raw",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single parsed metric message.
///
/// Messages are immutable once created. They are produced by
/// [`Message::parse`] from lines in the `name:value|type[|extra]` format and
/// consumed by the router.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// A counter increment (`foo:3|c`, optionally sampled as `foo:1|c|@0.1`).
    Counter {
        /// The metric name.
        name: String,
        /// The increment, scaled by the inverse sample rate if present.
        value: f64,
    },
    /// A gauge write (`foo:42|g`), last write wins.
    Gauge {
        /// The metric name.
        name: String,
        /// The gauge value.
        value: f64,
    },
    /// A latency sample (`foo:120|ms`).
    Timing {
        /// The metric name.
        name: String,
        /// The sample in milliseconds.
        value_ms: f64,
    },
    /// A raw line (`foo:1|r[|epoch]`) passed through without aggregation.
    ///
    /// The original line text round-trips exactly.
    Raw {
        /// The verbatim input line.
        line: String,
    },
    /// A line that failed to parse.
    Invalid {
        /// The reason the line was rejected.
        reason: ParseError,
    },
}

impl Message {
    /// Parses one metric line.
    ///
    /// This function is pure and stateless; it never fails. Malformed input
    /// yields [`Message::Invalid`] carrying a human-readable reason, and no
    /// line is ever dropped silently.
    pub fn parse(line: &str) -> Message {
        match parse_line(line) {
            Ok(message) => message,
            Err(reason) => Message::Invalid { reason },
        }
    }

    /// Returns the routing kind, or `None` for invalid messages.
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            Self::Counter { .. } => Some(MessageKind::Counter),
            Self::Gauge { .. } => Some(MessageKind::Gauge),
            Self::Timing { .. } => Some(MessageKind::Timing),
            Self::Raw { .. } => Some(MessageKind::Raw),
            Self::Invalid { .. } => None,
        }
    }

    /// Returns the metric name for aggregated kinds.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Counter { name, .. } | Self::Gauge { name, .. } | Self::Timing { name, .. } => {
                Some(name)
            }
            Self::Raw { .. } | Self::Invalid { .. } => None,
        }
    }
}

fn parse_line(line: &str) -> Result<Message, ParseError> {
    let (name, rest) = line
        .split_once(':')
        .ok_or(ParseError::MissingValueSeparator)?;

    if name.is_empty() {
        return Err(ParseError::EmptyName);
    }

    let mut parts = rest.split('|');
    let raw_value = parts.next().unwrap_or_default();
    let ty = parts.next().ok_or(ParseError::MissingTypeSeparator)?;
    let extra = parts.next();

    let value = || -> Result<f64, ParseError> {
        raw_value
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| ParseError::InvalidValue(raw_value.to_owned()))
    };

    let message = match ty {
        "c" => {
            let mut value = value()?;
            if let Some(extra) = extra {
                value /= parse_sample_rate(extra)?;
            }
            Message::Counter {
                name: name.to_owned(),
                value,
            }
        }
        "g" => Message::Gauge {
            name: name.to_owned(),
            value: value()?,
        },
        "ms" => Message::Timing {
            name: name.to_owned(),
            value_ms: value()?,
        },
        "r" => {
            // Raw lines must still carry a well-formed value, but the line
            // itself round-trips verbatim, including a trailing epoch.
            value()?;
            Message::Raw {
                line: line.to_owned(),
            }
        }
        other => return Err(ParseError::UnknownType(other.to_owned())),
    };

    Ok(message)
}

fn parse_sample_rate(extra: &str) -> Result<f64, ParseError> {
    extra
        .strip_prefix('@')
        .and_then(|rate| rate.parse::<f64>().ok())
        .filter(|rate| *rate > 0.0 && *rate <= 1.0)
        .ok_or_else(|| ParseError::InvalidSampleRate(extra.to_owned()))
}
