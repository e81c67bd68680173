use std::collections::BTreeMap;

use statspipe_common::UnixTimestamp;
use statspipe_statsd::metric;

use crate::statsd::{MetricCounters, MetricTimers};
use crate::{Bucket, CounterBucket, Message};

use super::{reject_unexpected, Aggregate};

/// Sums counter increments per metric name.
///
/// State is cleared on every flush, so each bucket covers exactly one window.
#[derive(Debug)]
pub struct CounterAggregator {
    namespace: String,
    counts: BTreeMap<String, f64>,
}

impl CounterAggregator {
    /// Creates an empty counter aggregator emitting under `namespace`.
    pub fn new(namespace: String) -> Self {
        Self {
            namespace,
            counts: BTreeMap::new(),
        }
    }
}

impl Aggregate for CounterAggregator {
    fn name(&self) -> &'static str {
        "counters"
    }

    fn add(&mut self, message: Message) {
        match message {
            Message::Counter { name, value } => {
                *self.counts.entry(name).or_insert(0.0) += value;
            }
            other => reject_unexpected(self.name(), &other),
        }
    }

    fn flush(&mut self, epoch: UnixTimestamp) -> Option<Bucket> {
        if self.counts.is_empty() {
            return None;
        }

        let bucket = metric!(timer(MetricTimers::FlushDuration), aggregator = self.name(), {
            CounterBucket {
                epoch,
                namespace: self.namespace.clone(),
                counts: std::mem::take(&mut self.counts),
            }
        });

        metric!(
            counter(MetricCounters::BucketsFlushed) += 1,
            aggregator = self.name(),
        );

        Some(Bucket::Counters(bucket))
    }

    fn entry_count(&self) -> usize {
        self.counts.len()
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn epoch() -> UnixTimestamp {
        UnixTimestamp::from_secs(1_600_000_000)
    }

    #[test]
    fn test_sums_increments() {
        let mut aggregator = CounterAggregator::new("stats.counters".to_owned());

        // A first write of one plus one hundred increments.
        aggregator.add(Message::parse("foo:1|c"));
        for value in 1..=100 {
            aggregator.add(Message::Counter {
                name: "foo".to_owned(),
                value: value as f64,
            });
        }

        let bucket = aggregator.flush(epoch()).unwrap();
        match bucket {
            Bucket::Counters(bucket) => {
                assert_eq!(bucket.counts["foo"], 5051.0);
                assert_eq!(bucket.namespace, "stats.counters");
            }
            other => panic!("unexpected bucket {other:?}"),
        }
    }

    #[test]
    fn test_names_stay_isolated() {
        let mut aggregator = CounterAggregator::new(String::new());
        aggregator.add(Message::parse("foo:1|c"));
        aggregator.add(Message::parse("bar:2|c"));
        aggregator.add(Message::parse("foo:3|c"));

        match aggregator.flush(epoch()).unwrap() {
            Bucket::Counters(bucket) => {
                assert_eq!(bucket.counts.len(), 2);
                assert_eq!(bucket.counts["foo"], 4.0);
                assert_eq!(bucket.counts["bar"], 2.0);
            }
            other => panic!("unexpected bucket {other:?}"),
        }
    }

    #[test]
    fn test_clears_after_flush() {
        let mut aggregator = CounterAggregator::new(String::new());
        aggregator.add(Message::parse("foo:5|c"));

        assert!(aggregator.flush(epoch()).is_some());
        assert_eq!(aggregator.entry_count(), 0);
        assert!(aggregator.flush(epoch()).is_none());
    }

    #[test]
    fn test_rejects_other_kinds() {
        let mut aggregator = CounterAggregator::new(String::new());
        aggregator.add(Message::parse("foo:5|g"));
        assert!(aggregator.flush(epoch()).is_none());
    }
}
