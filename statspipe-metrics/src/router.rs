use std::collections::BTreeMap;

use statspipe_statsd::metric;
use statspipe_system::Recipient;

use crate::statsd::MetricCounters;
use crate::{Add, Message, MessageKind};

/// Dispatches parsed messages to the aggregators registered for their kind.
///
/// A kind may have multiple targets; timing messages typically reach the
/// latency aggregator plus one percentile aggregator per configured
/// threshold, each receiving its own copy. Kinds without a registered target
/// drop their messages, counted.
///
/// The router holds the only senders to the aggregation stage. Dropping it
/// closes every registered aggregator's inbox, which is what propagates
/// shutdown past the parser.
#[derive(Debug, Default)]
pub struct MessageRouter {
    routes: BTreeMap<MessageKind, Vec<Recipient<Add>>>,
}

impl MessageRouter {
    /// Creates a router with no targets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an additional target for the given kind.
    pub fn register(&mut self, kind: MessageKind, target: Recipient<Add>) {
        self.routes.entry(kind).or_default().push(target);
    }

    /// Routes one message to all targets of its kind.
    pub fn route(&self, message: Message) {
        let Some(kind) = message.kind() else {
            // Invalid messages are counted by the parser and never routed.
            return;
        };

        let targets = self.routes.get(&kind).map(Vec::as_slice).unwrap_or(&[]);
        match targets.split_last() {
            Some((last, rest)) => {
                for target in rest {
                    target.send(Add(message.clone()));
                }
                last.send(Add(message));
            }
            None => {
                statspipe_log::debug!(kind = kind.as_str(), "no aggregator for message kind");
                metric!(
                    counter(MetricCounters::MessagesUnrouted) += 1,
                    kind = kind.as_str(),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use statspipe_system::{Addr, Service};

    use crate::aggregate::{CounterAggregator, PercentileAggregator};
    use crate::{Aggregator, AggregatorService, EntryCount, FlushBucket, TickHandle};

    use super::*;

    fn spawn_aggregator<A: crate::aggregate::Aggregate>(
        aggregate: A,
        ticks: &TickHandle,
        output: Recipient<FlushBucket>,
    ) -> Addr<Aggregator> {
        AggregatorService::new(aggregate, ticks.subscribe(), output).start()
    }

    /// Swallows flushed buckets.
    fn null_output() -> Recipient<FlushBucket> {
        use statspipe_system::{FromMessage, Interface, NoResponse, Receiver};

        #[derive(Debug)]
        enum Null {
            Bucket(#[allow(dead_code)] FlushBucket),
        }

        impl Interface for Null {}

        impl FromMessage<FlushBucket> for Null {
            type Response = NoResponse;

            fn from_message(message: FlushBucket, _: ()) -> Self {
                Self::Bucket(message)
            }
        }

        struct NullService;

        impl Service for NullService {
            type Interface = Null;

            fn spawn_handler(self, mut rx: Receiver<Self::Interface>) {
                tokio::spawn(async move { while rx.recv().await.is_some() {} });
            }
        }

        NullService.start().recipient()
    }

    #[tokio::test]
    async fn test_timing_fans_out() {
        let ticks = TickHandle::new();
        let counters = spawn_aggregator(
            CounterAggregator::new(String::new()),
            &ticks,
            null_output(),
        );
        let p50 = spawn_aggregator(
            PercentileAggregator::new(String::new(), 50, None, 100),
            &ticks,
            null_output(),
        );
        let p90 = spawn_aggregator(
            PercentileAggregator::new(String::new(), 90, None, 100),
            &ticks,
            null_output(),
        );

        let mut router = MessageRouter::new();
        router.register(MessageKind::Counter, counters.clone().recipient());
        router.register(MessageKind::Timing, p50.clone().recipient());
        router.register(MessageKind::Timing, p90.clone().recipient());

        router.route(Message::parse("req:10|ms"));
        router.route(Message::parse("req:20|ms"));
        router.route(Message::parse("hits:1|c"));

        assert_eq!(p50.send(EntryCount).await.unwrap(), 1);
        assert_eq!(p90.send(EntryCount).await.unwrap(), 1);
        assert_eq!(counters.send(EntryCount).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unrouted_kind_is_dropped() {
        let router = MessageRouter::new();

        // Nothing to assert beyond not panicking; the drop is counted.
        router.route(Message::parse("foo:1|g"));
        router.route(Message::parse("garbage"));
    }
}
