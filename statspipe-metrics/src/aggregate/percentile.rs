use std::collections::BTreeMap;

use statspipe_common::UnixTimestamp;
use statspipe_statsd::metric;

use crate::statsd::{MetricCounters, MetricTimers};
use crate::{Bucket, Message, PercentileBucket};

use super::reservoir::{capture, Reservoir};
use super::{reject_unexpected, Aggregate};

/// Computes one nearest-rank percentile over timing samples per metric name.
///
/// One instance exists per configured percentile; all instances for the same
/// kind receive every timing message independently.
#[derive(Debug)]
pub struct PercentileAggregator {
    namespace: String,
    percentile: u8,
    label: String,
    capacity: usize,
    reservoirs: BTreeMap<String, Reservoir>,
}

impl PercentileAggregator {
    /// Creates an empty percentile aggregator emitting under `namespace`.
    ///
    /// The entry label defaults to `p<percentile>` unless `alias` is given.
    pub fn new(namespace: String, percentile: u8, alias: Option<String>, capacity: usize) -> Self {
        let label = alias.unwrap_or_else(|| format!("p{percentile}"));
        Self {
            namespace,
            percentile,
            label,
            capacity,
            reservoirs: BTreeMap::new(),
        }
    }

    /// The label appended to emitted entry names.
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Selects the nearest-rank percentile from unsorted samples.
///
/// Sorts ascending and picks the 1-indexed rank `ceil(p/100 * n)` clamped to
/// `[1, n]`. Small sample counts legitimately collapse toward the maximum.
fn nearest_rank(mut samples: Vec<f64>, percentile: u8) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }

    samples.sort_unstable_by(|a, b| a.total_cmp(b));

    let n = samples.len();
    let rank = (f64::from(percentile) / 100.0 * n as f64).ceil() as usize;
    let rank = rank.clamp(1, n);
    Some(samples[rank - 1])
}

impl Aggregate for PercentileAggregator {
    fn name(&self) -> &'static str {
        "percentiles"
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
            let mut values = BTreeMap::new();
            for (name, reservoir) in std::mem::take(&mut self.reservoirs) {
                let (samples, _rejected) = reservoir.take();
                if let Some(value) = nearest_rank(samples, self.percentile) {
                    values.insert(name, value);
                }
            }

            PercentileBucket {
                epoch,
                namespace: self.namespace.clone(),
                label: self.label.clone(),
                values,
            }
        });

        metric!(
            counter(MetricCounters::BucketsFlushed) += 1,
            aggregator = self.name(),
        );

        Some(Bucket::Percentiles(bucket))
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

    fn values(bucket: Bucket) -> BTreeMap<String, f64> {
        match bucket {
            Bucket::Percentiles(bucket) => bucket.values,
            other => panic!("unexpected bucket {other:?}"),
        }
    }

    fn timings(aggregator: &mut PercentileAggregator, name: &str, samples: impl IntoIterator<Item = f64>) {
        for value_ms in samples {
            aggregator.add(Message::Timing {
                name: name.to_owned(),
                value_ms,
            });
        }
    }

    #[test]
    fn test_p50_of_one_hundred() {
        let mut aggregator = PercentileAggregator::new(String::new(), 50, None, 1000);
        timings(&mut aggregator, "foo", (1..=100).map(f64::from));

        let values = values(aggregator.flush(epoch()).unwrap());
        assert_eq!(values["foo"], 50.0);
    }

    #[test]
    fn test_p90_of_one_hundred() {
        let mut aggregator = PercentileAggregator::new(String::new(), 90, None, 1000);
        timings(&mut aggregator, "foo", (1..=100).map(f64::from));

        let values = values(aggregator.flush(epoch()).unwrap());
        assert_eq!(values["foo"], 90.0);
    }

    #[test]
    fn test_small_sample_clamps_to_max() {
        let mut aggregator = PercentileAggregator::new(String::new(), 90, None, 1000);
        timings(&mut aggregator, "foo", [100.0, 200.0, 300.0, 400.0]);

        let values = values(aggregator.flush(epoch()).unwrap());
        assert_eq!(values["foo"], 400.0);
    }

    #[test]
    fn test_names_stay_isolated() {
        let mut aggregator = PercentileAggregator::new(String::new(), 80, None, 1000);
        timings(&mut aggregator, "foo", (1..=10).map(f64::from));
        timings(&mut aggregator, "bar", (1..=10).map(|v| f64::from(v) * 10.0));

        let values = values(aggregator.flush(epoch()).unwrap());
        assert_eq!(values["foo"], 8.0);
        assert_eq!(values["bar"], 80.0);
    }

    #[test]
    fn test_alias_label() {
        let aggregator =
            PercentileAggregator::new(String::new(), 98, Some("super".to_owned()), 1000);
        assert_eq!(aggregator.label(), "super");

        let aggregator = PercentileAggregator::new(String::new(), 98, None, 1000);
        assert_eq!(aggregator.label(), "p98");
    }

    #[test]
    fn test_single_sample() {
        assert_eq!(nearest_rank(vec![42.0], 1), Some(42.0));
        assert_eq!(nearest_rank(vec![42.0], 99), Some(42.0));
        assert_eq!(nearest_rank(Vec::new(), 50), None);
    }
}
