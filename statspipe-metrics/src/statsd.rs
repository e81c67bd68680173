use statspipe_statsd::{CounterMetric, GaugeMetric, TimerMetric};

/// Counter metrics emitted by the metrics pipeline.
pub enum MetricCounters {
    /// Number of metric lines received by the parser.
    ///
    /// This metric is tagged with:
    ///  - `kind`: The routing kind of the parsed message, or `invalid`.
    LinesReceived,

    /// Number of lines that failed to parse.
    LinesFailed,

    /// Number of parsed messages dropped because no aggregator was
    /// registered for their kind.
    MessagesUnrouted,

    /// Number of messages delivered to an aggregator that does not handle
    /// their kind.
    ///
    /// This metric is tagged with:
    ///  - `aggregator`: The name of the rejecting aggregator.
    MessagesUnexpectedKind,

    /// Number of samples rejected by a full reservoir.
    ///
    /// This metric is tagged with:
    ///  - `aggregator`: The name of the owning aggregator.
    SamplesOverflowed,

    /// Number of buckets produced by flushes.
    ///
    /// This metric is tagged with:
    ///  - `aggregator`: The name of the flushing aggregator.
    BucketsFlushed,

    /// Number of zero-valued gauges removed after a flush.
    GaugesRemoved,
}

impl CounterMetric for MetricCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::LinesReceived => "lines.received",
            Self::LinesFailed => "lines.failed",
            Self::MessagesUnrouted => "messages.unrouted",
            Self::MessagesUnexpectedKind => "messages.unexpected_kind",
            Self::SamplesOverflowed => "samples.overflowed",
            Self::BucketsFlushed => "buckets.flushed",
            Self::GaugesRemoved => "gauges.removed",
        }
    }
}

/// Gauge metrics emitted by the metrics pipeline.
pub enum MetricGauges {
    /// Number of distinct entries held by an aggregator between flushes.
    ///
    /// This metric is tagged with:
    ///  - `aggregator`: The name of the aggregator.
    AggregatorEntries,
}

impl GaugeMetric for MetricGauges {
    fn name(&self) -> &'static str {
        match self {
            Self::AggregatorEntries => "aggregator.entries",
        }
    }
}

/// Timer metrics emitted by the metrics pipeline.
pub enum MetricTimers {
    /// Time spent snapshotting an aggregator into a bucket.
    ///
    /// This metric is tagged with:
    ///  - `aggregator`: The name of the flushing aggregator.
    FlushDuration,
}

impl TimerMetric for MetricTimers {
    fn name(&self) -> &'static str {
        match self {
            Self::FlushDuration => "flush.duration",
        }
    }
}
