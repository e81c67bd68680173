use std::sync::Arc;

use async_trait::async_trait;
use statspipe_metrics::Bucket;
use tokio::sync::{mpsc, watch};

/// An output destination for finished buckets.
///
/// Sinks are handed every bucket of every flush round through [`offer`].
/// The call must not block: implementations queue internally and apply their
/// own delivery policy. The lifecycle ends with a single [`complete`] call,
/// after which [`completion`] resolves once all queued work has been
/// delivered or dropped, and [`is_active`] turns false.
///
/// [`offer`]: Sink::offer
/// [`complete`]: Sink::complete
/// [`completion`]: Sink::completion
/// [`is_active`]: Sink::is_active
#[async_trait]
pub trait Sink: Send + Sync {
    /// A short name identifying the sink in logs and metrics.
    fn name(&self) -> &'static str;

    /// Hands a finished bucket to the sink without blocking.
    fn offer(&self, bucket: Arc<Bucket>);

    /// Signals that no further buckets will be offered.
    fn complete(&self);

    /// Resolves once the sink has finished all outstanding work.
    ///
    /// Also resolves for a sink that failed terminally; [`Sink::is_active`]
    /// reports the difference.
    async fn completion(&self);

    /// Returns `true` while the sink accepts buckets.
    fn is_active(&self) -> bool;

    /// Reports a non-recoverable sink error.
    ///
    /// The pipeline keeps running; the failure is logged loudly so operators
    /// notice the missing output.
    fn fault(&self, error: &dyn std::error::Error) {
        statspipe_log::error!(sink = self.name(), %error, "sink failed");
    }
}

/// Commands processed by a sink worker task.
enum SinkCommand {
    Offer(Arc<Bucket>),
    Complete,
}

/// Processes buckets on behalf of a [`Sink`], one at a time.
#[async_trait]
pub(crate) trait SinkWorker: Send + 'static {
    /// Delivers one bucket.
    async fn process(&mut self, bucket: Arc<Bucket>);

    /// Runs once after the last bucket, before the sink reports inactive.
    async fn finish(&mut self) {}
}

/// Queueing front end shared by the bundled sinks.
///
/// Spawns the worker on its own task, forwards offered buckets through an
/// unbounded channel, and tracks the active flag on a watch channel so that
/// [`completion`](SinkHandle::completion) can await the transition.
#[derive(Debug)]
pub(crate) struct SinkHandle {
    name: &'static str,
    tx: mpsc::UnboundedSender<SinkCommand>,
    active: watch::Receiver<bool>,
}

impl SinkHandle {
    /// Spawns `worker` and returns the handle controlling it.
    pub fn spawn<W: SinkWorker>(name: &'static str, mut worker: W) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (active_tx, active_rx) = watch::channel(true);

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    SinkCommand::Offer(bucket) => worker.process(bucket).await,
                    SinkCommand::Complete => break,
                }
            }

            worker.finish().await;
            let _ = active_tx.send(false);
            statspipe_log::debug!(sink = name, "sink completed");
        });

        Self {
            name,
            tx,
            active: active_rx,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn offer(&self, bucket: Arc<Bucket>) {
        if self.tx.send(SinkCommand::Offer(bucket)).is_err() {
            statspipe_log::debug!(sink = self.name, "bucket offered after completion");
        }
    }

    pub fn complete(&self) {
        let _ = self.tx.send(SinkCommand::Complete);
    }

    pub async fn completion(&self) {
        let mut active = self.active.clone();
        while *active.borrow_and_update() {
            if active.changed().await.is_err() {
                break;
            }
        }
    }

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }
}

#[cfg(test)]
mod tests {
    use statspipe_common::UnixTimestamp;
    use statspipe_metrics::RawBucket;

    use super::*;

    struct RecordingWorker {
        seen: mpsc::UnboundedSender<usize>,
    }

    #[async_trait]
    impl SinkWorker for RecordingWorker {
        async fn process(&mut self, bucket: Arc<Bucket>) {
            let _ = self.seen.send(bucket.len());
        }

        async fn finish(&mut self) {
            let _ = self.seen.send(usize::MAX);
        }
    }

    fn raw_bucket(lines: &[&str]) -> Arc<Bucket> {
        Arc::new(Bucket::Raw(RawBucket {
            epoch: UnixTimestamp::from_secs(1_600_000_000),
            lines: lines.iter().map(|line| (*line).to_owned()).collect(),
        }))
    }

    #[tokio::test]
    async fn test_worker_processes_then_finishes() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let handle = SinkHandle::spawn("recording", RecordingWorker { seen: seen_tx });

        assert!(handle.is_active());
        handle.offer(raw_bucket(&["a:1|r"]));
        handle.offer(raw_bucket(&["a:1|r", "b:2|r"]));
        handle.complete();
        handle.completion().await;

        assert!(!handle.is_active());
        assert_eq!(seen_rx.recv().await, Some(1));
        assert_eq!(seen_rx.recv().await, Some(2));
        assert_eq!(seen_rx.recv().await, Some(usize::MAX));
    }

    #[tokio::test]
    async fn test_offer_after_complete_is_ignored() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let handle = SinkHandle::spawn("recording", RecordingWorker { seen: seen_tx });

        handle.complete();
        handle.completion().await;
        handle.offer(raw_bucket(&["a:1|r"]));

        // Only the finish marker arrives.
        assert_eq!(seen_rx.recv().await, Some(usize::MAX));
        assert_eq!(seen_rx.recv().await, None);
    }
}
