use std::collections::BTreeMap;

use statspipe_common::UnixTimestamp;
use statspipe_statsd::metric;

use crate::statsd::{MetricCounters, MetricTimers};
use crate::{Bucket, LatencyBucket, LatencySummary, Message};

use super::reservoir::{capture, Reservoir};
use super::{reject_unexpected, Aggregate};

/// Summarizes timing samples per metric name.
///
/// Samples are captured in bounded reservoirs and reduced at flush time to
/// `{count, sum, sumSquares?, min, max}`. Reservoirs are dropped on flush, so
/// each bucket covers exactly one window.
#[derive(Debug)]
pub struct LatencyAggregator {
    namespace: String,
    sum_squares: bool,
    capacity: usize,
    reservoirs: BTreeMap<String, Reservoir>,
}

impl LatencyAggregator {
    /// Creates an empty latency aggregator emitting under `namespace`.
    pub fn new(namespace: String, sum_squares: bool, capacity: usize) -> Self {
        Self {
            namespace,
            sum_squares,
            capacity,
            reservoirs: BTreeMap::new(),
        }
    }

    fn summarize(&self, samples: &[f64]) -> LatencySummary {
        let mut summary = LatencySummary {
            count: samples.len() as u64,
            sum: 0.0,
            sum_squares: self.sum_squares.then_some(0.0),
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        };

        for &sample in samples {
            summary.sum += sample;
            if let Some(sum_squares) = &mut summary.sum_squares {
                *sum_squares += sample * sample;
            }
            summary.min = summary.min.min(sample);
            summary.max = summary.max.max(sample);
        }

        summary
    }
}

impl Aggregate for LatencyAggregator {
    fn name(&self) -> &'static str {
        "timers"
    }

    fn add(&mut self, message: Message) {
        match message {
            Message::Timing { name, value_ms } => {
                let aggregator = self.name();
                capture(&mut self.reservoirs, self.capacity, aggregator, name, value_ms);
            }
            other => reject_unexpected(self.name(), &other),
        }
    }

    fn flush(&mut self, epoch: UnixTimestamp) -> Option<Bucket> {
        if self.reservoirs.is_empty() {
            return None;
        }

        let bucket = metric!(timer(MetricTimers::FlushDuration), aggregator = self.name(), {
            let mut summaries = BTreeMap::new();
            for (name, reservoir) in std::mem::take(&mut self.reservoirs) {
                let (samples, _rejected) = reservoir.take();
                if !samples.is_empty() {
                    summaries.insert(name, self.summarize(&samples));
                }
            }

            LatencyBucket {
                epoch,
                namespace: self.namespace.clone(),
                summaries,
            }
        });

        metric!(
            counter(MetricCounters::BucketsFlushed) += 1,
            aggregator = self.name(),
        );

        Some(Bucket::Latencies(bucket))
    }

    fn entry_count(&self) -> usize {
        self.reservoirs.len()
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn epoch() -> UnixTimestamp {
        UnixTimestamp::from_secs(1_600_000_000)
    }

    fn summaries(bucket: Bucket) -> BTreeMap<String, LatencySummary> {
        match bucket {
            Bucket::Latencies(bucket) => bucket.summaries,
            other => panic!("unexpected bucket {other:?}"),
        }
    }

    #[test]
    fn test_summarizes_window() {
        let mut aggregator = LatencyAggregator::new("stats.timers".to_owned(), true, 1000);
        for value in [10.0, 20.0, 30.0] {
            aggregator.add(Message::Timing {
                name: "req".to_owned(),
                value_ms: value,
            });
        }

        let summaries = summaries(aggregator.flush(epoch()).unwrap());
        let summary = &summaries["req"];
        assert_eq!(summary.count, 3);
        assert_eq!(summary.sum, 60.0);
        assert_eq!(summary.sum_squares, Some(1400.0));
        assert_eq!(summary.min, 10.0);
        assert_eq!(summary.max, 30.0);
    }

    #[test]
    fn test_sum_squares_gated() {
        let mut aggregator = LatencyAggregator::new(String::new(), false, 1000);
        aggregator.add(Message::parse("req:5|ms"));

        let summaries = summaries(aggregator.flush(epoch()).unwrap());
        assert_eq!(summaries["req"].sum_squares, None);
    }

    #[test]
    fn test_clears_after_flush() {
        let mut aggregator = LatencyAggregator::new(String::new(), false, 1000);
        aggregator.add(Message::parse("req:5|ms"));

        assert!(aggregator.flush(epoch()).is_some());
        assert_eq!(aggregator.entry_count(), 0);
        assert!(aggregator.flush(epoch()).is_none());
    }

    #[test]
    fn test_reservoir_capacity_bounds_window() {
        let mut aggregator = LatencyAggregator::new(String::new(), false, 2);
        for value in [1.0, 2.0, 3.0, 4.0] {
            aggregator.add(Message::Timing {
                name: "req".to_owned(),
                value_ms: value,
            });
        }

        let summaries = summaries(aggregator.flush(epoch()).unwrap());
        assert_eq!(summaries["req"].count, 2);
        assert_eq!(summaries["req"].max, 2.0);
    }
}
