use std::sync::Arc;

use statspipe_metrics::FlushBucket;
use statspipe_statsd::metric;
use statspipe_system::{FromMessage, Interface, NoResponse, Receiver, Service};
use tokio::sync::oneshot;

use crate::sink::Sink;
use crate::statsd::{ServerCounters, ServerGauges};

/// Messages handled by the [`BroadcastService`].
#[derive(Debug)]
pub enum Broadcast {
    /// A finished bucket to fan out.
    Bucket(FlushBucket),
}

impl Interface for Broadcast {}

impl FromMessage<FlushBucket> for Broadcast {
    type Response = NoResponse;

    fn from_message(message: FlushBucket, _: ()) -> Self {
        Self::Bucket(message)
    }
}

/// Fans finished buckets out to every registered sink.
///
/// Every sink receives a shared reference to the same bucket; inactive sinks
/// are skipped and counted. When the last upstream sender disappears the
/// service completes each sink, waits for all of them to drain, and then
/// resolves the completion receiver returned by [`BroadcastService::new`].
/// That receiver firing is the final step of the shutdown cascade.
pub struct BroadcastService {
    sinks: Vec<Arc<dyn Sink>>,
    done: oneshot::Sender<()>,
}

impl BroadcastService {
    /// Creates the service along with its completion receiver.
    pub fn new(sinks: Vec<Arc<dyn Sink>>) -> (Self, oneshot::Receiver<()>) {
        let (done, done_rx) = oneshot::channel();
        (Self { sinks, done }, done_rx)
    }
}

impl Service for BroadcastService {
    type Interface = Broadcast;

    fn spawn_handler(self, mut rx: Receiver<Self::Interface>) {
        let Self { sinks, done } = self;

        tokio::spawn(async move {
            metric!(gauge(ServerGauges::SinksRegistered) = sinks.len() as u64);

            while let Some(message) = rx.recv().await {
                match message {
                    Broadcast::Bucket(FlushBucket(bucket)) => {
                        for sink in &sinks {
                            if sink.is_active() {
                                sink.offer(Arc::clone(&bucket));
                                metric!(
                                    counter(ServerCounters::BucketsOffered) += 1,
                                    sink = sink.name(),
                                );
                            } else {
                                metric!(
                                    counter(ServerCounters::BucketsSkipped) += 1,
                                    sink = sink.name(),
                                );
                            }
                        }
                    }
                }
            }

            statspipe_log::debug!(sinks = sinks.len(), "broadcaster draining sinks");
            for sink in &sinks {
                sink.complete();
            }
            futures::future::join_all(sinks.iter().map(|sink| sink.completion())).await;

            statspipe_log::debug!("broadcaster completed");
            let _ = done.send(());
        });
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use statspipe_common::UnixTimestamp;
    use statspipe_metrics::{Bucket, RawBucket};
    use statspipe_system::Recipient;
    use tokio::sync::{mpsc, watch};

    use super::*;

    /// Records offers without any worker task.
    struct TestSink {
        offers: mpsc::UnboundedSender<Arc<Bucket>>,
        active: watch::Sender<bool>,
    }

    impl TestSink {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Arc<Bucket>>) {
            let (offers, offers_rx) = mpsc::unbounded_channel();
            let (active, _) = watch::channel(true);
            (Arc::new(Self { offers, active }), offers_rx)
        }
    }

    #[async_trait]
    impl Sink for TestSink {
        fn name(&self) -> &'static str {
            "test"
        }

        fn offer(&self, bucket: Arc<Bucket>) {
            let _ = self.offers.send(bucket);
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

    fn raw_bucket(line: &str) -> FlushBucket {
        FlushBucket(Arc::new(Bucket::Raw(RawBucket {
            epoch: UnixTimestamp::from_secs(1_600_000_000),
            lines: vec![line.to_owned()],
        })))
    }

    #[tokio::test]
    async fn test_fans_out_to_all_sinks() {
        let (first, mut first_rx) = TestSink::new();
        let (second, mut second_rx) = TestSink::new();

        let (service, done) = BroadcastService::new(vec![first, second]);
        let output: Recipient<FlushBucket> = service.start().recipient();

        output.send(raw_bucket("a:1|r"));
        drop(output);
        done.await.unwrap();

        let bucket = first_rx.recv().await.unwrap();
        assert_eq!(bucket.to_lines(), vec!["a:1|r"]);
        let bucket = second_rx.recv().await.unwrap();
        assert_eq!(bucket.to_lines(), vec!["a:1|r"]);
    }

    #[tokio::test]
    async fn test_inactive_sink_is_skipped() {
        let (sink, mut offers) = TestSink::new();
        sink.complete();

        let (service, done) = BroadcastService::new(vec![Arc::clone(&sink) as Arc<dyn Sink>]);
        let output: Recipient<FlushBucket> = service.start().recipient();

        output.send(raw_bucket("a:1|r"));
        drop(output);
        done.await.unwrap();

        assert!(offers.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_completes_with_no_sinks() {
        let (service, done) = BroadcastService::new(Vec::new());
        let output: Recipient<FlushBucket> = service.start().recipient();

        drop(output);
        done.await.unwrap();
    }
}
