//! Per-kind metric accumulators.
//!
//! Each aggregator owns the state for one metric kind and implements
//! [`Aggregate`]: `add` folds a parsed message into that state, `flush`
//! snapshots it into an immutable [`Bucket`](crate::Bucket) and resets for the
//! next window. Aggregators are plain single-threaded state machines; the
//! surrounding [`AggregatorService`](crate::AggregatorService) task provides
//! the serialization.

use statspipe_common::UnixTimestamp;

use crate::{Bucket, Message};

mod counters;
mod gauges;
mod latency;
mod percentile;
mod raw;
mod reservoir;

pub use self::counters::*;
pub use self::gauges::*;
pub use self::latency::*;
pub use self::percentile::*;
pub use self::raw::*;
pub use self::reservoir::*;

/// A metric accumulator for one kind of message.
pub trait Aggregate: Send + 'static {
    /// Short name used in logs and internal metrics.
    fn name(&self) -> &'static str;

    /// Folds one message into the accumulated state.
    ///
    /// Messages of an unexpected kind are counted and dropped.
    fn add(&mut self, message: Message);

    /// Snapshots the accumulated state into a bucket stamped with `epoch`.
    ///
    /// Returns `None` when there is nothing to emit for this round. After
    /// this call the aggregator is ready for the next window.
    fn flush(&mut self, epoch: UnixTimestamp) -> Option<Bucket>;

    /// Number of distinct entries currently held.
    fn entry_count(&self) -> usize;
}

/// Counts and logs a message that reached the wrong aggregator.
pub(crate) fn reject_unexpected(aggregator: &'static str, message: &Message) {
    statspipe_log::debug!(
        aggregator,
        kind = ?message.kind(),
        "dropping message of unexpected kind"
    );
    statspipe_statsd::metric!(
        counter(crate::statsd::MetricCounters::MessagesUnexpectedKind) += 1,
        aggregator = aggregator,
    );
}
