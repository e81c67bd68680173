use statspipe_statsd::{CounterMetric, GaugeMetric};

/// Counter metrics emitted by the output stage.
pub enum ServerCounters {
    /// Number of buckets handed to a sink.
    ///
    /// This metric is tagged with:
    ///  - `sink`: The name of the receiving sink.
    BucketsOffered,

    /// Number of buckets skipped because a sink was no longer active.
    ///
    /// This metric is tagged with:
    ///  - `sink`: The name of the inactive sink.
    BucketsSkipped,

    /// Number of line batches sent to the forwarding peer.
    ForwardBatches,

    /// Number of line batches dropped after exhausting all retries.
    ForwardBatchesDropped,

    /// Number of reconnect-and-resend attempts after a send failure.
    ForwardRetries,

    /// Number of payload bytes sent to the forwarding peer, after
    /// compression.
    ForwardBytes,
}

impl CounterMetric for ServerCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::BucketsOffered => "buckets.offered",
            Self::BucketsSkipped => "buckets.skipped",
            Self::ForwardBatches => "forward.batches",
            Self::ForwardBatchesDropped => "forward.batches.dropped",
            Self::ForwardRetries => "forward.retries",
            Self::ForwardBytes => "forward.bytes",
        }
    }
}

/// Gauge metrics emitted by the output stage.
pub enum ServerGauges {
    /// Number of sinks registered with the broadcaster.
    SinksRegistered,
}

impl GaugeMetric for ServerGauges {
    fn name(&self) -> &'static str {
        match self {
            Self::SinksRegistered => "sinks.registered",
        }
    }
}
