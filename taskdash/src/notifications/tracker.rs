//! Local notification inbox with an unread counter.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use taskdash_proto::notification::{Notification, NotificationId};

use super::NotificationError;
use crate::api::TaskApi;
use crate::events::{EventSink, SyncEvent};
use crate::poll::PollSource;
use crate::transport::{Transport, TransportError};

#[derive(Debug, Default)]
struct Inbox {
    notifications: Vec<Notification>,
    /// Ids read on this client that the server still lists. A poll never
    /// un-reads them.
    read_locally: HashSet<NotificationId>,
    /// Set on logout. Checked under the same lock as every poll.
    closed: bool,
}

impl Inbox {
    fn unread(&self) -> usize {
        self.notifications.iter().filter(|n| !n.is_read).count()
    }
}

/// The current user's notifications and unread count.
#[derive(Debug)]
pub struct NotificationTracker {
    inbox: Mutex<Inbox>,
    events: EventSink,
}

impl NotificationTracker {
    #[must_use]
    pub fn new(events: EventSink) -> Self {
        Self {
            inbox: Mutex::new(Inbox::default()),
            events,
        }
    }

    /// Number of unread notifications.
    #[must_use]
    pub fn unread(&self) -> usize {
        self.inbox.lock().unread()
    }

    /// Copy of the inbox, in server order.
    #[must_use]
    pub fn list(&self) -> Vec<Notification> {
        self.inbox.lock().notifications.clone()
    }

    /// Replaces the inbox with a polled list.
    ///
    /// Notifications read on this client stay read even if the poll still
    /// reports them unread. Local read marks for notifications the server no
    /// longer lists are forgotten. Emits [`SyncEvent::NotificationsUpdated`]
    /// when the list or the unread count changed.
    pub fn apply_snapshot(&self, mut snapshot: Vec<Notification>) {
        let mut inbox = self.inbox.lock();
        if inbox.closed {
            return;
        }
        let listed: HashSet<&NotificationId> = snapshot.iter().map(|n| &n.id).collect();
        inbox.read_locally.retain(|id| listed.contains(id));
        drop(listed);
        for notification in &mut snapshot {
            if inbox.read_locally.contains(&notification.id) {
                notification.is_read = true;
            }
        }
        if inbox.notifications == snapshot {
            return;
        }
        inbox.notifications = snapshot;
        let unread = inbox.unread();
        // Under the lock so nothing is reported after close.
        self.events.emit(SyncEvent::NotificationsUpdated { unread });
    }

    /// Fetches the inbox once and applies it.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError::TransportFailure`] if the fetch fails.
    pub async fn refresh<T: Transport>(&self, api: &TaskApi<T>) -> Result<(), NotificationError> {
        let snapshot = api.fetch_notifications().await?;
        self.apply_snapshot(snapshot);
        Ok(())
    }

    /// Marks one notification read locally, then on the server.
    ///
    /// Returns `Ok(false)` without contacting the server if it was already
    /// read.
    ///
    /// # Errors
    ///
    /// - [`NotificationError::NotFound`] if the id is not in the inbox.
    /// - [`NotificationError::TransportFailure`] if the server call failed.
    ///   The notification stays read locally.
    pub async fn mark_as_read<T: Transport>(
        &self,
        api: &TaskApi<T>,
        id: &NotificationId,
    ) -> Result<bool, NotificationError> {
        let unread = {
            let mut inbox = self.inbox.lock();
            let notification = inbox
                .notifications
                .iter_mut()
                .find(|n| &n.id == id)
                .ok_or_else(|| NotificationError::NotFound(id.clone()))?;
            if !notification.mark_read() {
                return Ok(false);
            }
            inbox.read_locally.insert(id.clone());
            inbox.unread()
        };
        self.events.emit(SyncEvent::NotificationsUpdated { unread });

        let result = api.mark_notification_read(id).await;
        self.report_write(result)?;
        Ok(true)
    }

    /// Marks every notification read locally, then on the server with a
    /// single call. Returns how many were unread locally.
    ///
    /// # Errors
    ///
    /// [`NotificationError::TransportFailure`] if the server call failed.
    /// The local read state is kept.
    pub async fn mark_all_as_read<T: Transport>(
        &self,
        api: &TaskApi<T>,
    ) -> Result<usize, NotificationError> {
        let marked = {
            let mut inbox = self.inbox.lock();
            let mut ids = Vec::new();
            for notification in &mut inbox.notifications {
                if notification.mark_read() {
                    ids.push(notification.id.clone());
                }
            }
            inbox.read_locally.extend(ids.iter().cloned());
            ids.len()
        };
        if marked > 0 {
            self.events.emit(SyncEvent::NotificationsUpdated { unread: 0 });
        }

        let result = api.mark_all_notifications_read().await;
        self.report_write(result)?;
        Ok(marked)
    }

    fn report_write(&self, result: Result<(), TransportError>) -> Result<(), NotificationError> {
        result.map_err(|err| {
            let message = err.to_string();
            tracing::warn!(error = %message, "marking notifications read failed");
            self.events.emit(SyncEvent::NotificationWriteFailed {
                message: message.clone(),
            });
            NotificationError::TransportFailure(message)
        })
    }

    /// Empties the inbox and ignores later polls.
    pub fn close(&self) {
        let mut inbox = self.inbox.lock();
        inbox.closed = true;
        inbox.notifications.clear();
        inbox.read_locally.clear();
    }
}

/// Poll source feeding a [`NotificationTracker`].
pub struct NotificationPoll<T: Transport> {
    api: Arc<TaskApi<T>>,
    tracker: Arc<NotificationTracker>,
}

impl<T: Transport> NotificationPoll<T> {
    #[must_use]
    pub const fn new(api: Arc<TaskApi<T>>, tracker: Arc<NotificationTracker>) -> Self {
        Self { api, tracker }
    }
}

impl<T: Transport + 'static> PollSource for NotificationPoll<T> {
    type Snapshot = Vec<Notification>;

    fn name(&self) -> &'static str {
        "notifications"
    }

    async fn fetch(&self) -> Result<Vec<Notification>, TransportError> {
        self.api.fetch_notifications().await
    }

    fn apply(&self, snapshot: Vec<Notification>) {
        self.tracker.apply_snapshot(snapshot);
    }
}
