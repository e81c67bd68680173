use std::collections::BTreeMap;

use statspipe_statsd::metric;

use crate::statsd::MetricCounters;

/// A bounded collection of raw samples for one metric name and window.
///
/// Once the reservoir reaches capacity, new samples are rejected and counted
/// rather than evicting older ones. The already captured distribution stays
/// intact, which keeps percentile results stable under bursts at the cost of
/// ignoring late samples within the window.
#[derive(Debug)]
pub struct Reservoir {
    capacity: usize,
    samples: Vec<f64>,
    rejected: u64,
}

impl Reservoir {
    /// Creates an empty reservoir holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: Vec::new(),
            rejected: 0,
        }
    }

    /// Captures a sample, returning `false` if the reservoir is full.
    pub fn push(&mut self, value: f64) -> bool {
        if self.samples.len() < self.capacity {
            self.samples.push(value);
            true
        } else {
            self.rejected += 1;
            false
        }
    }

    /// Number of captured samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if no samples were captured.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drains the reservoir, returning the captured samples and the number of
    /// samples rejected at capacity.
    pub fn take(self) -> (Vec<f64>, u64) {
        (self.samples, self.rejected)
    }
}

/// Captures one sample into the named reservoir, creating it on first use.
///
/// Rejections at capacity are counted per aggregator.
pub(super) fn capture(
    reservoirs: &mut BTreeMap<String, Reservoir>,
    capacity: usize,
    aggregator: &'static str,
    name: String,
    value: f64,
) {
    let accepted = reservoirs
        .entry(name)
        .or_insert_with(|| Reservoir::new(capacity))
        .push(value);

    if !accepted {
        metric!(
            counter(MetricCounters::SamplesOverflowed) += 1,
            aggregator = aggregator,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_at_capacity() {
        let mut reservoir = Reservoir::new(3);
        assert!(reservoir.push(1.0));
        assert!(reservoir.push(2.0));
        assert!(reservoir.push(3.0));
        assert!(!reservoir.push(4.0));
        assert!(!reservoir.push(5.0));

        let (samples, rejected) = reservoir.take();
        assert_eq!(samples, vec![1.0, 2.0, 3.0]);
        assert_eq!(rejected, 2);
    }

    #[test]
    fn test_capture_creates_and_counts() {
        let mut reservoirs = BTreeMap::new();
        capture(&mut reservoirs, 2, "timers", "foo".to_owned(), 1.0);
        capture(&mut reservoirs, 2, "timers", "foo".to_owned(), 2.0);
        capture(&mut reservoirs, 2, "timers", "foo".to_owned(), 3.0);
        capture(&mut reservoirs, 2, "timers", "bar".to_owned(), 9.0);

        assert_eq!(reservoirs.len(), 2);
        let (samples, rejected) = reservoirs.remove("foo").unwrap().take();
        assert_eq!(samples, vec![1.0, 2.0]);
        assert_eq!(rejected, 1);
    }
}
