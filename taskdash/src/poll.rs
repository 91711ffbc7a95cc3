//! Cancellable periodic polling bound to a session.
//!
//! [`spawn_poll_loop`] runs a [`PollSource`] on a fixed interval in a
//! background tokio task. Each tick fetches, then applies the result unless
//! the loop was stopped while the fetch was in flight. Fetch failures are
//! logged and the loop waits for the next tick.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::transport::TransportError;

/// One category of data kept in sync by polling.
pub trait PollSource: Send + Sync + 'static {
    /// What a successful fetch produces.
    type Snapshot: Send;

    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Fetches the current server state.
    fn fetch(&self) -> impl Future<Output = Result<Self::Snapshot, TransportError>> + Send;

    /// Merges a fetched snapshot into local state.
    fn apply(&self, snapshot: Self::Snapshot);
}

/// Handle to a running poll loop.
#[derive(Debug)]
pub struct PollHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Asks the loop to stop. Results of a fetch already in flight are
    /// discarded.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Whether [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Whether the background task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the loop and waits for the background task to exit.
    pub async fn join(self) {
        self.stop();
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "poll task ended abnormally");
        }
    }
}

/// Starts polling `source` every `interval`, with the first tick immediate.
///
/// If `wake` is given, notifying it triggers an extra tick right away and
/// restarts the interval from there.
pub fn spawn_poll_loop<S: PollSource>(
    source: Arc<S>,
    interval: Duration,
    wake: Option<Arc<Notify>>,
) -> PollHandle {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run(source, interval, wake, shutdown_rx));
    PollHandle { shutdown, task }
}

async fn run<S: PollSource>(
    source: Arc<S>,
    interval: Duration,
    wake: Option<Arc<Notify>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = source.name();
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::debug!(source = name, ?interval, "poll loop started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
            () = wait_for(wake.as_deref()) => ticker.reset(),
        }
        if *shutdown.borrow() {
            break;
        }

        let result = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            result = source.fetch() => result,
        };

        // The session may have ended while the fetch was in flight.
        if *shutdown.borrow() {
            tracing::debug!(source = name, "discarding poll result after stop");
            break;
        }

        match result {
            Ok(snapshot) => source.apply(snapshot),
            Err(err) => tracing::warn!(source = name, error = %err, "poll failed, retrying next tick"),
        }
    }

    tracing::debug!(source = name, "poll loop stopped");
}

async fn wait_for(wake: Option<&Notify>) {
    match wake {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}
