use statspipe_common::UnixTimestamp;
use statspipe_statsd::metric;

use crate::statsd::MetricCounters;
use crate::{Bucket, Message, RawBucket};

use super::{reject_unexpected, Aggregate};

/// Collects raw lines verbatim and passes them through unaggregated.
///
/// Arrival order is preserved within a window; the collection is unbounded
/// and fully drained on every flush.
#[derive(Debug, Default)]
pub struct RawAggregator {
    lines: Vec<String>,
}

impl RawAggregator {
    /// Creates an empty passthrough.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Aggregate for RawAggregator {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn add(&mut self, message: Message) {
        match message {
            Message::Raw { line } => self.lines.push(line),
            other => reject_unexpected(self.name(), &other),
        }
    }

    fn flush(&mut self, epoch: UnixTimestamp) -> Option<Bucket> {
        if self.lines.is_empty() {
            return None;
        }

        metric!(
            counter(MetricCounters::BucketsFlushed) += 1,
            aggregator = self.name(),
        );

        Some(Bucket::Raw(RawBucket {
            epoch,
            lines: std::mem::take(&mut self.lines),
        }))
    }

    fn entry_count(&self) -> usize {
        self.lines.len()
    }
}
