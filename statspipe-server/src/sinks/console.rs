use std::sync::Arc;

use async_trait::async_trait;
use statspipe_metrics::Bucket;

use crate::sink::{Sink, SinkHandle, SinkWorker};

/// Prints every bucket to standard output as rendered metric lines.
#[derive(Debug)]
pub struct ConsoleSink {
    handle: SinkHandle,
}

impl ConsoleSink {
    /// Spawns the sink on the current runtime.
    pub fn new() -> Self {
        Self {
            handle: SinkHandle::spawn("console", ConsoleWorker),
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

struct ConsoleWorker;

#[async_trait]
impl SinkWorker for ConsoleWorker {
    async fn process(&mut self, bucket: Arc<Bucket>) {
        #[allow(clippy::print_stdout)]
        for line in bucket.to_lines() {
            println!("{line}");
        }
    }
}

#[async_trait]
impl Sink for ConsoleSink {
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
