use std::collections::BTreeMap;
use std::fmt;

use statspipe_common::UnixTimestamp;

/// A single rendered metric line in `name value epoch` form.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricLine {
    /// Fully qualified metric name including the namespace prefix.
    pub name: String,
    /// The metric value.
    pub value: f64,
    /// The epoch of the flush round that produced the line.
    pub epoch: UnixTimestamp,
}

impl MetricLine {
    /// Creates a line from an already prefixed name.
    pub fn new(name: String, value: f64, epoch: UnixTimestamp) -> Self {
        Self { name, value, epoch }
    }
}

impl fmt::Display for MetricLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.value, self.epoch)
    }
}

/// Joins a namespace prefix and a metric name with a dot.
///
/// An empty prefix yields the bare name.
fn prefixed(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_owned()
    } else {
        format!("{namespace}.{name}")
    }
}

/// Snapshot of the counter aggregator for one flush round.
#[derive(Clone, Debug, PartialEq)]
pub struct CounterBucket {
    /// The shared epoch of the flush round.
    pub epoch: UnixTimestamp,
    /// Namespace prefix applied to every entry.
    pub namespace: String,
    /// Accumulated totals per metric name.
    pub counts: BTreeMap<String, f64>,
}

/// Snapshot of the gauge aggregator for one flush round.
///
/// Gauges persist between rounds; the map reflects the current value of every
/// live gauge, not only those written since the previous flush.
#[derive(Clone, Debug, PartialEq)]
pub struct GaugeBucket {
    /// The shared epoch of the flush round.
    pub epoch: UnixTimestamp,
    /// Namespace prefix applied to every entry.
    pub namespace: String,
    /// Current value per gauge name.
    pub gauges: BTreeMap<String, f64>,
}

/// Statistical summary of one metric name's latency samples in a window.
#[derive(Clone, Debug, PartialEq)]
pub struct LatencySummary {
    /// Number of samples captured.
    pub count: u64,
    /// Sum of all samples.
    pub sum: f64,
    /// Sum of squared samples, when enabled.
    pub sum_squares: Option<f64>,
    /// Smallest sample.
    pub min: f64,
    /// Largest sample.
    pub max: f64,
}

/// Snapshot of the timing aggregator for one flush round.
#[derive(Clone, Debug, PartialEq)]
pub struct LatencyBucket {
    /// The shared epoch of the flush round.
    pub epoch: UnixTimestamp,
    /// Namespace prefix applied to every entry.
    pub namespace: String,
    /// Per-name summaries over the window's samples.
    pub summaries: BTreeMap<String, LatencySummary>,
}

/// Snapshot of one percentile aggregator for one flush round.
#[derive(Clone, Debug, PartialEq)]
pub struct PercentileBucket {
    /// The shared epoch of the flush round.
    pub epoch: UnixTimestamp,
    /// Namespace prefix applied to every entry.
    pub namespace: String,
    /// Suffix appended to each entry name, `p90` by default.
    pub label: String,
    /// Computed percentile value per metric name.
    pub values: BTreeMap<String, f64>,
}

/// Raw lines drained from the passthrough in one flush round.
#[derive(Clone, Debug, PartialEq)]
pub struct RawBucket {
    /// The shared epoch of the flush round.
    pub epoch: UnixTimestamp,
    /// Lines in arrival order, verbatim.
    pub lines: Vec<String>,
}

/// An immutable snapshot of one aggregator's state for one flush round.
///
/// Buckets are constructed once by the flushing aggregator and then shared
/// read-only with every sink, usually behind an `Arc`.
#[derive(Clone, Debug, PartialEq)]
pub enum Bucket {
    /// Counter totals.
    Counters(CounterBucket),
    /// Current gauge values.
    Gauges(GaugeBucket),
    /// Latency summaries.
    Latencies(LatencyBucket),
    /// Computed percentiles.
    Percentiles(PercentileBucket),
    /// Raw passthrough lines.
    Raw(RawBucket),
}

impl Bucket {
    /// The epoch shared by every bucket of the same flush round.
    pub fn epoch(&self) -> UnixTimestamp {
        match self {
            Self::Counters(bucket) => bucket.epoch,
            Self::Gauges(bucket) => bucket.epoch,
            Self::Latencies(bucket) => bucket.epoch,
            Self::Percentiles(bucket) => bucket.epoch,
            Self::Raw(bucket) => bucket.epoch,
        }
    }

    /// Number of entries in the bucket.
    pub fn len(&self) -> usize {
        match self {
            Self::Counters(bucket) => bucket.counts.len(),
            Self::Gauges(bucket) => bucket.gauges.len(),
            Self::Latencies(bucket) => bucket.summaries.len(),
            Self::Percentiles(bucket) => bucket.values.len(),
            Self::Raw(bucket) => bucket.lines.len(),
        }
    }

    /// Returns `true` if the bucket carries no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Renders the bucket into `name value epoch` lines.
    ///
    /// Raw lines are emitted verbatim instead of being re-rendered.
    pub fn to_lines(&self) -> Vec<String> {
        match self {
            Self::Counters(bucket) => bucket
                .counts
                .iter()
                .map(|(name, value)| {
                    MetricLine::new(prefixed(&bucket.namespace, name), *value, bucket.epoch)
                        .to_string()
                })
                .collect(),
            Self::Gauges(bucket) => bucket
                .gauges
                .iter()
                .map(|(name, value)| {
                    MetricLine::new(prefixed(&bucket.namespace, name), *value, bucket.epoch)
                        .to_string()
                })
                .collect(),
            Self::Latencies(bucket) => {
                let mut lines = Vec::with_capacity(bucket.summaries.len() * 4);
                for (name, summary) in &bucket.summaries {
                    let prefix = prefixed(&bucket.namespace, name);
                    let epoch = bucket.epoch;
                    let mut push = |suffix: &str, value: f64| {
                        lines.push(
                            MetricLine::new(format!("{prefix}.{suffix}"), value, epoch).to_string(),
                        );
                    };
                    push("count", summary.count as f64);
                    push("sum", summary.sum);
                    if let Some(sum_squares) = summary.sum_squares {
                        push("sumSquares", sum_squares);
                    }
                    push("min", summary.min);
                    push("max", summary.max);
                }
                lines
            }
            Self::Percentiles(bucket) => bucket
                .values
                .iter()
                .map(|(name, value)| {
                    let name = format!("{}.{}", prefixed(&bucket.namespace, name), bucket.label);
                    MetricLine::new(name, *value, bucket.epoch).to_string()
                })
                .collect(),
            Self::Raw(bucket) => bucket.lines.clone(),
        }
    }
}
