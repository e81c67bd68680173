use std::collections::BTreeMap;

use statspipe_common::UnixTimestamp;
use statspipe_statsd::metric;

use crate::statsd::{MetricCounters, MetricTimers};
use crate::{Bucket, GaugeBucket, Message};

use super::{reject_unexpected, Aggregate};

/// Tracks the latest value written per gauge name.
///
/// Unlike counters, gauge state persists across flushes: every round emits
/// the full set of live gauges. With `remove_zero_gauges` enabled, gauges
/// whose value is exactly zero are dropped right after being reported.
#[derive(Debug)]
pub struct GaugeAggregator {
    namespace: String,
    remove_zero_gauges: bool,
    gauges: BTreeMap<String, f64>,
}

impl GaugeAggregator {
    /// Creates an empty gauge aggregator emitting under `namespace`.
    pub fn new(namespace: String, remove_zero_gauges: bool) -> Self {
        Self {
            namespace,
            remove_zero_gauges,
            gauges: BTreeMap::new(),
        }
    }
}

impl Aggregate for GaugeAggregator {
    fn name(&self) -> &'static str {
        "gauges"
    }

    fn add(&mut self, message: Message) {
        match message {
            Message::Gauge { name, value } => {
                self.gauges.insert(name, value);
            }
            other => reject_unexpected(self.name(), &other),
        }
    }

    fn flush(&mut self, epoch: UnixTimestamp) -> Option<Bucket> {
        if self.gauges.is_empty() {
            return None;
        }

        let bucket = metric!(timer(MetricTimers::FlushDuration), aggregator = self.name(), {
            GaugeBucket {
                epoch,
                namespace: self.namespace.clone(),
                gauges: self.gauges.clone(),
            }
        });

        if self.remove_zero_gauges {
            let before = self.gauges.len();
            self.gauges.retain(|_, value| *value != 0.0);
            let removed = before - self.gauges.len();
            if removed > 0 {
                statspipe_log::debug!(removed, "removed zero-valued gauges");
                metric!(counter(MetricCounters::GaugesRemoved) += removed as i64);
            }
        }

        metric!(
            counter(MetricCounters::BucketsFlushed) += 1,
            aggregator = self.name(),
        );

        Some(Bucket::Gauges(bucket))
    }

    fn entry_count(&self) -> usize {
        self.gauges.len()
    }
}
