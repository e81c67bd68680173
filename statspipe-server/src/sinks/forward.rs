use std::sync::Arc;

use async_trait::async_trait;
use statspipe_config::ForwardConfig;
use statspipe_metrics::Bucket;
use statspipe_statsd::metric;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::codec::{encode_frame, join_lines, CLOSE_SENTINEL};
use crate::sink::{Sink, SinkHandle, SinkWorker};
use crate::statsd::ServerCounters;

/// Forwards all metric lines to a peer statspipe instance over TCP.
///
/// Buckets are rendered into lines and sent as one frame per bucket. A
/// failed send reconnects and retries a bounded number of times before the
/// batch is dropped and counted; later batches start over with a fresh
/// connection attempt, so a recovering peer picks the stream back up.
#[derive(Debug)]
pub struct ForwardSink {
    handle: SinkHandle,
}

impl ForwardSink {
    /// Spawns the sink on the current runtime.
    pub fn new(config: ForwardConfig) -> Self {
        Self {
            handle: SinkHandle::spawn(
                "forward",
                ForwardWorker {
                    client: ForwardClient::new(config),
                },
            ),
        }
    }
}

struct ForwardWorker {
    client: ForwardClient,
}

#[async_trait]
impl SinkWorker for ForwardWorker {
    async fn process(&mut self, bucket: Arc<Bucket>) {
        let lines = bucket.to_lines();
        if lines.is_empty() {
            return;
        }

        if self.client.send_lines(&lines).await {
            metric!(counter(ServerCounters::ForwardBatches) += 1);
        } else {
            metric!(counter(ServerCounters::ForwardBatchesDropped) += 1);
            statspipe_log::warn!(
                lines = lines.len(),
                "dropping batch after exhausting forward retries"
            );
        }
    }

    async fn finish(&mut self) {
        self.client.close().await;
    }
}

/// A reconnecting TCP client speaking the peer frame protocol.
#[derive(Debug)]
struct ForwardClient {
    config: ForwardConfig,
    stream: Option<TcpStream>,
}

impl ForwardClient {
    fn new(config: ForwardConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    /// Sends one batch of lines, retrying per the configured policy.
    ///
    /// Returns `false` once all attempts are exhausted.
    async fn send_lines(&mut self, lines: &[String]) -> bool {
        let payload = join_lines(lines);
        let frame = encode_frame(
            payload.as_bytes(),
            self.config.enable_compression,
            self.config.compression_threshold,
        );

        for attempt in 0..=self.config.retries {
            if attempt > 0 {
                metric!(counter(ServerCounters::ForwardRetries) += 1);
                tokio::time::sleep(self.config.retry_delay()).await;
            }

            match self.try_send(&frame).await {
                Ok(()) => {
                    metric!(counter(ServerCounters::ForwardBytes) += frame.len() as i64);
                    return true;
                }
                Err(error) => {
                    // The connection is stale after any error.
                    self.stream = None;
                    statspipe_log::warn!(
                        %error,
                        attempt,
                        host = self.config.host,
                        port = self.config.port,
                        "failed to forward batch"
                    );
                }
            }
        }

        false
    }

    async fn try_send(&mut self, frame: &[u8]) -> std::io::Result<()> {
        let stream = self.connect().await?;
        stream.write_all(frame).await?;
        stream.flush().await
    }

    async fn connect(&mut self) -> std::io::Result<&mut TcpStream> {
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => {
                let addr = (self.config.host.as_str(), self.config.port);
                let stream = TcpStream::connect(addr).await?;
                statspipe_log::debug!(
                    host = self.config.host,
                    port = self.config.port,
                    "connected to forwarding peer"
                );
                stream
            }
        };

        Ok(self.stream.insert(stream))
    }

    /// Announces the close to the peer and drops the connection.
    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.write_all(&[CLOSE_SENTINEL]).await;
            let _ = stream.flush().await;
            let _ = stream.shutdown().await;
        }
    }
}

#[async_trait]
impl Sink for ForwardSink {
    fn name(&self) -> &'static str {
        self.handle.name()
    }

    fn offer(&self, bucket: Arc<Bucket>) {
        self.handle.offer(bucket);
    }

    fn complete(&self) {
        self.handle.complete();
    }

    async fn completion(&self) {
        self.handle.completion().await;
    }

    fn is_active(&self) -> bool {
        self.handle.is_active()
    }
}
