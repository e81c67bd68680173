use std::time::Duration;

use statspipe_common::UnixTimestamp;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// Buffered ticks per subscriber before the stream reports a lag.
const TICK_CHANNEL_CAPACITY: usize = 16;

/// One flush signal delivered to every aggregator.
///
/// Every subscriber of the same round observes the identical tick, so all
/// buckets of that round share one epoch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tick {
    /// Wall-clock time of the tick.
    pub epoch: UnixTimestamp,
}

/// Sending side of the tick broadcast.
///
/// Cloned freely; ticks reach every live [`TickStream`]. Production code
/// drives this from an [`IntervalService`], tests call [`tick_at`] directly
/// for deterministic rounds.
///
/// [`tick_at`]: TickHandle::tick_at
#[derive(Clone, Debug)]
pub struct TickHandle {
    tx: broadcast::Sender<Tick>,
}

impl TickHandle {
    /// Creates a tick broadcast with no subscribers.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(TICK_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribes a new stream receiving all subsequent ticks.
    pub fn subscribe(&self) -> TickStream {
        TickStream {
            rx: self.tx.subscribe(),
        }
    }

    /// Fires a tick with the given epoch, returning the subscriber count.
    pub fn tick_at(&self, epoch: UnixTimestamp) -> usize {
        self.tx.send(Tick { epoch }).unwrap_or(0)
    }

    /// Fires a tick stamped with the current wall-clock time.
    pub fn tick_now(&self) -> usize {
        self.tick_at(UnixTimestamp::now())
    }
}

impl Default for TickHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the tick broadcast.
#[derive(Debug)]
pub struct TickStream {
    rx: broadcast::Receiver<Tick>,
}

impl TickStream {
    /// Receives the next tick.
    ///
    /// Returns `None` once every [`TickHandle`] has been dropped. A lagging
    /// subscriber skips missed ticks and keeps receiving; a skipped tick only
    /// defers the affected flush to the next round.
    pub async fn next(&mut self) -> Option<Tick> {
        loop {
            match self.rx.recv().await {
                Ok(tick) => return Some(tick),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    statspipe_log::warn!(skipped, "tick stream lagging");
                }
            }
        }
    }
}

/// The single clock source of the pipeline.
///
/// Fires one tick per flush interval until no subscriber is left, which
/// happens when the last aggregator drains during shutdown.
#[derive(Debug)]
pub struct IntervalService {
    interval: Duration,
    handle: TickHandle,
}

impl IntervalService {
    /// Creates the service without starting the clock.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            handle: TickHandle::new(),
        }
    }

    /// Returns a handle for subscribing aggregators.
    pub fn handle(&self) -> TickHandle {
        self.handle.clone()
    }

    /// Starts the clock on the current runtime.
    ///
    /// Subscribers must exist before the first interval elapses, otherwise
    /// the clock observes an empty broadcast and stops.
    pub fn start(self) {
        tokio::spawn(async move {
            statspipe_log::debug!(interval = ?self.interval, "interval service starting");

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick of a tokio interval fires immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if self.handle.tick_now() == 0 {
                    break;
                }
            }

            statspipe_log::debug!("interval service stopped");
        });
    }
}
