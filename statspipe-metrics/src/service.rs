use std::sync::Arc;

use statspipe_common::UnixTimestamp;
use statspipe_statsd::metric;
use statspipe_system::{
    Addr, FromMessage, Interface, NoResponse, Receiver, Recipient, Service,
};

use crate::aggregate::Aggregate;
use crate::statsd::MetricCounters;
use crate::{Bucket, Message, MessageRouter, TickStream};

/// A finished bucket on its way to the sinks.
///
/// The bucket is shared read-only; every sink receives a clone of the same
/// `Arc`.
#[derive(Clone, Debug)]
pub struct FlushBucket(pub Arc<Bucket>);

/// Delivers one parsed message to an aggregator.
#[derive(Debug)]
pub struct Add(pub Message);

/// Queries the number of entries an aggregator currently holds.
///
/// Because the inbox is processed in order, awaiting the response also acts
/// as a barrier: all previously sent messages have been applied.
#[cfg(test)]
#[derive(Debug)]
pub struct EntryCount;

/// Messages handled by an [`AggregatorService`].
#[derive(Debug)]
pub enum Aggregator {
    /// See [`Add`].
    Add(Add),
    /// See [`EntryCount`].
    #[cfg(test)]
    EntryCount(statspipe_system::Sender<usize>),
}

impl Interface for Aggregator {}

impl FromMessage<Add> for Aggregator {
    type Response = NoResponse;

    fn from_message(message: Add, _: ()) -> Self {
        Self::Add(message)
    }
}

#[cfg(test)]
impl FromMessage<EntryCount> for Aggregator {
    type Response = statspipe_system::AsyncResponse<usize>;

    fn from_message(_: EntryCount, sender: statspipe_system::Sender<usize>) -> Self {
        Self::EntryCount(sender)
    }
}

/// Runs one [`Aggregate`] on its own task.
///
/// The task serializes incoming messages and flush ticks, which makes the
/// snapshot boundary atomic without locks. Lifecycle: while the inbox is
/// open, `Add` messages accumulate state and each tick flushes a bucket to
/// the output. Once every upstream sender is gone the inbox closes, the task
/// performs one final drain flush and drops its output handle, propagating
/// completion downstream.
#[derive(Debug)]
pub struct AggregatorService<A> {
    aggregate: A,
    ticks: TickStream,
    output: Recipient<FlushBucket>,
}

impl<A: Aggregate> AggregatorService<A> {
    /// Creates a service flushing `aggregate` on every tick of `ticks`.
    pub fn new(aggregate: A, ticks: TickStream, output: Recipient<FlushBucket>) -> Self {
        Self {
            aggregate,
            ticks,
            output,
        }
    }
}

impl<A: Aggregate> Service for AggregatorService<A> {
    type Interface = Aggregator;

    fn spawn_handler(self, mut rx: Receiver<Self::Interface>) {
        let Self {
            mut aggregate,
            mut ticks,
            output,
        } = self;

        tokio::spawn(async move {
            let mut ticks_live = true;

            loop {
                tokio::select! {
                    biased;

                    tick = ticks.next(), if ticks_live => match tick {
                        Some(tick) => flush_into(&mut aggregate, tick.epoch, &output),
                        None => ticks_live = false,
                    },

                    message = rx.recv() => match message {
                        Some(Aggregator::Add(Add(message))) => aggregate.add(message),
                        #[cfg(test)]
                        Some(Aggregator::EntryCount(sender)) => {
                            sender.send(aggregate.entry_count())
                        }
                        None => break,
                    },
                }
            }

            // Admitted writes are flushed before completion; the drain round
            // carries its own timestamp since the clock may be gone already.
            flush_into(&mut aggregate, UnixTimestamp::now(), &output);
            statspipe_log::debug!(aggregator = aggregate.name(), "aggregator completed");
        });
    }
}

fn flush_into<A: Aggregate>(aggregate: &mut A, epoch: UnixTimestamp, output: &Recipient<FlushBucket>) {
    if let Some(bucket) = aggregate.flush(epoch) {
        output.send(FlushBucket(Arc::new(bucket)));
    }

    metric!(
        gauge(crate::statsd::MetricGauges::AggregatorEntries) = aggregate.entry_count() as u64,
        aggregator = aggregate.name(),
    );
}

/// Submits one raw metric line to the pipeline.
#[derive(Debug)]
pub struct ProcessLine(pub String);

/// Submits a batch of raw metric lines to the pipeline.
#[derive(Debug)]
pub struct ProcessLines(pub Vec<String>);

/// Messages handled by the [`ParserService`].
#[derive(Debug)]
pub enum Parser {
    /// See [`ProcessLine`].
    ProcessLine(ProcessLine),
    /// See [`ProcessLines`].
    ProcessLines(ProcessLines),
}

impl Interface for Parser {}

impl FromMessage<ProcessLine> for Parser {
    type Response = NoResponse;

    fn from_message(message: ProcessLine, _: ()) -> Self {
        Self::ProcessLine(message)
    }
}

impl FromMessage<ProcessLines> for Parser {
    type Response = NoResponse;

    fn from_message(message: ProcessLines, _: ()) -> Self {
        Self::ProcessLines(message)
    }
}

/// Parses raw lines and routes the resulting messages.
///
/// This service is the entry point of the pipeline. It owns the
/// [`MessageRouter`] and with it the only senders to all aggregators, so
/// when its own inbox closes, dropping the router cascades the shutdown to
/// the aggregation stage.
#[derive(Debug)]
pub struct ParserService {
    router: MessageRouter,
}

impl ParserService {
    /// Creates the service routing via `router`.
    pub fn new(router: MessageRouter) -> Self {
        Self { router }
    }

    fn process(&self, line: &str) {
        let message = Message::parse(line);

        match message.kind() {
            Some(kind) => {
                metric!(
                    counter(MetricCounters::LinesReceived) += 1,
                    kind = kind.as_str(),
                );
                self.router.route(message);
            }
            None => {
                if let Message::Invalid { reason } = &message {
                    statspipe_log::debug!(%reason, line, "failed to parse metric line");
                }
                metric!(counter(MetricCounters::LinesReceived) += 1, kind = "invalid");
                metric!(counter(MetricCounters::LinesFailed) += 1);
            }
        }
    }
}

impl Service for ParserService {
    type Interface = Parser;

    fn spawn_handler(self, mut rx: Receiver<Self::Interface>) {
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    Parser::ProcessLine(ProcessLine(line)) => self.process(&line),
                    Parser::ProcessLines(ProcessLines(lines)) => {
                        for line in lines {
                            self.process(&line);
                        }
                    }
                }
            }

            // Dropping the router closes every aggregator inbox.
            statspipe_log::debug!("parser completed");
        });
    }
}

/// Handle to a running parser, accepted by listeners as their downstream.
pub type ParserAddr = Addr<Parser>;
