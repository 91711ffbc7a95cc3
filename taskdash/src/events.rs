//! Events surfaced by the sync engine to whatever drives the UI.

use taskdash_proto::task::TaskId;
use tokio::sync::mpsc;

/// Something the UI may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A poll brought a task the client was not tracking yet.
    TaskAdded {
        /// The new task.
        task_id: TaskId,
    },
    /// A poll brought a different authoritative copy of a tracked task.
    TaskChanged {
        /// The changed task.
        task_id: TaskId,
    },
    /// A task disappeared from the poll and its view was discarded.
    TaskEvicted {
        /// The evicted task.
        task_id: TaskId,
    },
    /// A local change is now visible and waiting to be committed.
    MutationApplied {
        /// The task being changed.
        task_id: TaskId,
    },
    /// The server accepted a local change.
    MutationConfirmed {
        /// The task that was changed.
        task_id: TaskId,
    },
    /// The server refused a local change; the view was rolled back.
    MutationFailed {
        /// The task that was rolled back.
        task_id: TaskId,
        /// Failure text from the transport.
        message: String,
    },
    /// The task list should be re-fetched now rather than on the next tick.
    RefreshRequested,
    /// The notification list or unread count changed.
    NotificationsUpdated {
        /// Current unread count.
        unread: usize,
    },
    /// Marking notifications read failed on the server. The local read
    /// state is kept.
    NotificationWriteFailed {
        /// Failure text from the transport.
        message: String,
    },
}

/// Sending half of the event channel.
///
/// Emitting never blocks: when the receiver lags behind, events are dropped
/// with a warning. A sink without a channel discards everything.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<SyncEvent>>,
}

impl EventSink {
    /// Creates a bounded event channel.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SyncEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { tx: None }
    }

    /// Delivers an event if there is room for it.
    pub fn emit(&self, event: SyncEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(?event, "event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("event receiver dropped");
            }
        }
    }
}
