use std::sync::Arc;

use statspipe_config::Config;
use statspipe_metrics::aggregate::{
    Aggregate, CounterAggregator, GaugeAggregator, LatencyAggregator, PercentileAggregator,
    RawAggregator,
};
use statspipe_metrics::{
    AggregatorService, FlushBucket, IntervalService, MessageKind, MessageRouter, ParserService,
    ProcessLine, ProcessLines, TickHandle,
};
use statspipe_system::{Recipient, Service};
use tokio::sync::oneshot;

use crate::service::BroadcastService;
use crate::sink::Sink;

/// Builds and starts the full aggregation pipeline.
///
/// Stage graph: parser, per-kind aggregators, broadcaster, sinks, with one
/// interval clock driving the flushes. Construction order matters only for
/// shutdown: every stage holds the sole senders to the next one, so the
/// cascade triggered by [`PipelineHandle::shutdown`] reaches the sinks last.
pub struct Pipeline;

impl Pipeline {
    /// Starts all pipeline services on the current runtime.
    pub fn start(config: &Config, sinks: Vec<Arc<dyn Sink>>) -> PipelineHandle {
        let (broadcast, done) = BroadcastService::new(sinks);
        let output: Recipient<FlushBucket> = broadcast.start().recipient();

        let interval = IntervalService::new(config.flush_interval());
        let ticks = interval.handle();

        let mut router = MessageRouter::new();

        if let Some(counters) = &config.aggregators.counters {
            register(
                &mut router,
                MessageKind::Counter,
                CounterAggregator::new(counters.namespace.clone()),
                &ticks,
                &output,
            );
        }

        if let Some(gauges) = &config.aggregators.gauges {
            register(
                &mut router,
                MessageKind::Gauge,
                GaugeAggregator::new(gauges.namespace.clone(), gauges.remove_zero_gauges),
                &ticks,
                &output,
            );
        }

        if let Some(timers) = &config.aggregators.timers {
            register(
                &mut router,
                MessageKind::Timing,
                LatencyAggregator::new(
                    timers.namespace.clone(),
                    timers.sum_squares,
                    timers.reservoir_capacity,
                ),
                &ticks,
                &output,
            );

            for percentile in &timers.percentiles {
                register(
                    &mut router,
                    MessageKind::Timing,
                    PercentileAggregator::new(
                        timers.namespace.clone(),
                        percentile.percentile,
                        percentile.alias.clone(),
                        timers.reservoir_capacity,
                    ),
                    &ticks,
                    &output,
                );
            }
        }

        // The raw passthrough is always active.
        register(&mut router, MessageKind::Raw, RawAggregator::new(), &ticks, &output);

        drop(output);

        let parser = ParserService::new(router).start();
        interval.start();

        statspipe_log::info!(
            flush_interval = ?config.flush_interval(),
            "aggregation pipeline started"
        );

        PipelineHandle {
            parser,
            ticks,
            done,
        }
    }
}

fn register<A: Aggregate>(
    router: &mut MessageRouter,
    kind: MessageKind,
    aggregate: A,
    ticks: &TickHandle,
    output: &Recipient<FlushBucket>,
) {
    let addr = AggregatorService::new(aggregate, ticks.subscribe(), output.clone()).start();
    router.register(kind, addr.recipient());
}

/// Handle to a running [`Pipeline`].
///
/// Listeners submit lines through this handle. Dropping it, or calling
/// [`shutdown`](PipelineHandle::shutdown), closes the parser's inbox and
/// starts the completion cascade.
#[derive(Debug)]
pub struct PipelineHandle {
    parser: statspipe_metrics::ParserAddr,
    ticks: TickHandle,
    done: oneshot::Receiver<()>,
}

impl PipelineHandle {
    /// Submits one raw metric line.
    pub fn line(&self, line: String) {
        self.parser.send(ProcessLine(line));
    }

    /// Submits a batch of raw metric lines.
    pub fn lines(&self, lines: Vec<String>) {
        self.parser.send(ProcessLines(lines));
    }

    /// Returns an address for listeners to submit lines independently.
    ///
    /// Every clone keeps the pipeline alive; listeners must drop theirs for
    /// shutdown to proceed.
    pub fn parser(&self) -> statspipe_metrics::ParserAddr {
        self.parser.clone()
    }

    /// Shuts the pipeline down and waits for the completion cascade.
    ///
    /// All lines admitted before this call are flushed and delivered to the
    /// sinks. Resolves once every sink has drained.
    pub async fn shutdown(self) {
        let Self { parser, ticks, done } = self;
        statspipe_log::info!("pipeline shutting down");
        drop(parser);
        drop(ticks);

        let _ = done.await;
        statspipe_log::info!("pipeline shutdown complete");
    }

    #[cfg(test)]
    fn tick_at(&self, epoch: statspipe_common::UnixTimestamp) -> usize {
        self.ticks.tick_at(epoch)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use statspipe_common::UnixTimestamp;
    use statspipe_metrics::Bucket;
    use tokio::sync::{mpsc, watch};

    use super::*;

    /// Collects every offered bucket until completion.
    struct CollectSink {
        buckets: mpsc::UnboundedSender<Arc<Bucket>>,
        active: watch::Sender<bool>,
    }

    impl CollectSink {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Arc<Bucket>>) {
            let (buckets, rx) = mpsc::unbounded_channel();
            let (active, _) = watch::channel(true);
            (Arc::new(Self { buckets, active }), rx)
        }
    }

    #[async_trait]
    impl Sink for CollectSink {
        fn name(&self) -> &'static str {
            "collect"
        }

        fn offer(&self, bucket: Arc<Bucket>) {
            let _ = self.buckets.send(bucket);
        }

        fn complete(&self) {
            self.active.send_replace(false);
        }

        async fn completion(&self) {
            let mut rx = self.active.subscribe();
            while *rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }

        fn is_active(&self) -> bool {
            *self.active.borrow()
        }
    }

    fn slow_config() -> Config {
        // Rounds are driven manually in tests.
        Config {
            flush_interval_ms: 3_600_000,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_idle_shutdown_completes() {
        statspipe_log::init_test();
        let (sink, _buckets) = CollectSink::new();
        let pipeline = Pipeline::start(&slow_config(), vec![sink]);

        // No traffic at all; the cascade must still finish promptly.
        tokio::time::timeout(Duration::from_secs(5), pipeline.shutdown())
            .await
            .expect("shutdown timed out");
    }

    #[tokio::test]
    async fn test_end_to_end_flush_shares_epoch() {
        let (sink, mut buckets) = CollectSink::new();
        let pipeline = Pipeline::start(&slow_config(), vec![sink]);

        pipeline.lines(vec![
            "hits:1|c".to_owned(),
            "hits:2|c".to_owned(),
            "mem:42|g".to_owned(),
            "req:10|ms".to_owned(),
            "req:20|ms".to_owned(),
            "raw.metric:7|r".to_owned(),
        ]);

        let epoch = UnixTimestamp::from_secs(1_600_000_000);
        // Counters, gauges, timers, p90, raw.
        let expected = 5;

        // Let the parser route everything before firing the round.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pipeline.tick_at(epoch), expected);

        let mut collected = Vec::new();
        while collected.len() < expected {
            let bucket = tokio::time::timeout(Duration::from_secs(5), buckets.recv())
                .await
                .expect("flush round timed out")
                .expect("sink channel closed");
            collected.push(bucket);
        }
        assert!(collected.iter().all(|bucket| bucket.epoch() == epoch));

        let mut lines: Vec<String> = collected
            .iter()
            .flat_map(|bucket| bucket.to_lines())
            .collect();
        lines.sort();
        assert!(lines.contains(&"stats.counters.hits 3 1600000000".to_owned()));
        assert!(lines.contains(&"stats.gauges.mem 42 1600000000".to_owned()));
        assert!(lines.contains(&"stats.timers.req.count 2 1600000000".to_owned()));
        assert!(lines.contains(&"stats.timers.req.p90 20 1600000000".to_owned()));
        assert!(lines.contains(&"raw.metric:7|r".to_owned()));

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_lines() {
        let (sink, mut buckets) = CollectSink::new();
        let pipeline = Pipeline::start(&slow_config(), vec![sink]);

        pipeline.line("pending:5|c".to_owned());
        pipeline.shutdown().await;

        // The admitted line was flushed during the drain round.
        let mut found = false;
        while let Ok(bucket) = buckets.try_recv() {
            if let Bucket::Counters(bucket) = bucket.as_ref() {
                assert_eq!(bucket.counts["pending"], 5.0);
                found = true;
            }
        }
        assert!(found);
    }
}
