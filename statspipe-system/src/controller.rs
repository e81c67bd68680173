use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::sync::watch;

/// Shutdown request message sent by the [`Controller`] to subscribed tasks.
///
/// A receiver should stop accepting new work, finish open work in an orderly
/// manner, and then let its inbox close naturally. After the timeout the
/// process will shut down regardless of what the receivers of this message
/// do.
#[derive(Clone, Copy, Debug, Default)]
pub struct Shutdown {
    /// The timeout for this shutdown. `None` indicates an immediate forced
    /// shutdown.
    pub timeout: Option<Duration>,
}

static SHUTDOWN: Lazy<watch::Sender<Option<Shutdown>>> = Lazy::new(|| watch::channel(None).0);

/// Cooperative handle to the process-wide shutdown signal.
///
/// Obtained from [`Controller::shutdown_handle`]. The handle can be awaited
/// from any number of tasks; every one of them observes the same signal.
#[derive(Clone, Debug)]
pub struct ShutdownHandle(watch::Receiver<Option<Shutdown>>);

impl ShutdownHandle {
    /// Waits for the shutdown signal and returns it.
    ///
    /// If shutdown was already requested, this resolves immediately.
    pub async fn notified(&mut self) -> Shutdown {
        loop {
            if let Some(shutdown) = *self.0.borrow_and_update() {
                return shutdown;
            }

            if self.0.changed().await.is_err() {
                return Shutdown::default();
            }
        }
    }

    /// Returns the shutdown request if shutdown was already triggered.
    pub fn get(&self) -> Option<Shutdown> {
        *self.0.borrow()
    }
}

/// Process-wide controller for the cooperative shutdown signal.
///
/// The controller does not stop any task by itself: cancellation only stops
/// new work from entering upstream stages. Already-admitted work finishes
/// naturally through the completion cascade of the pipeline.
#[derive(Debug)]
pub struct Controller;

impl Controller {
    /// Starts listening for process signals (SIGINT/SIGTERM).
    ///
    /// On SIGINT the shutdown is immediate; on SIGTERM the given graceful
    /// timeout is propagated to all shutdown handles.
    pub fn start(shutdown_timeout: Duration) {
        tokio::spawn(async move {
            let mut int = signal(tokio::signal::unix::SignalKind::interrupt());
            let mut term = signal(tokio::signal::unix::SignalKind::terminate());

            tokio::select! {
                _ = int.recv() => {
                    statspipe_log::info!("SIGINT received, exiting");
                    Self::trigger_shutdown(None);
                }
                _ = term.recv() => {
                    statspipe_log::info!(
                        "SIGTERM received, stopping in {}s",
                        shutdown_timeout.as_secs()
                    );
                    Self::trigger_shutdown(Some(shutdown_timeout));
                }
            }
        });
    }

    /// Returns a [`ShutdownHandle`] to receive the shutdown signal.
    pub fn shutdown_handle() -> ShutdownHandle {
        ShutdownHandle(SHUTDOWN.subscribe())
    }

    /// Manually triggers the shutdown signal.
    ///
    /// All shutdown handles resolve; subsequent triggers are ignored.
    pub fn trigger_shutdown(timeout: Option<Duration>) {
        SHUTDOWN.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(Shutdown { timeout });
                true
            } else {
                false
            }
        });
    }
}

fn signal(kind: tokio::signal::unix::SignalKind) -> tokio::signal::unix::Signal {
    tokio::signal::unix::signal(kind).expect("failed to install signal handler")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_resolves_handles() {
        let mut handle = Controller::shutdown_handle();
        assert!(handle.get().is_none());

        Controller::trigger_shutdown(Some(Duration::from_secs(5)));

        let shutdown = handle.notified().await;
        assert_eq!(shutdown.timeout, Some(Duration::from_secs(5)));

        // A handle obtained after the fact resolves immediately.
        let mut late = Controller::shutdown_handle();
        assert!(late.get().is_some());
        late.notified().await;
    }
}
