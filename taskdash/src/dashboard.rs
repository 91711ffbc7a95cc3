//! Session-scoped facade over the sync engine.
//!
//! A [`Dashboard`] owns everything that lives for one logged-in session:
//! the typed API client, the optimistic task store, the notification
//! tracker and the two poll loops feeding them. Events for the UI arrive on
//! the receiver returned by [`Dashboard::new`].
//!
//! ```text
//! UI  ←── SyncEvent ───  store / tracker  ←── poll loops (tasks, notifications)
//!     ─── advance, cancel, read, ... ──→ store.apply_local + commit
//! ```

use std::sync::Arc;
use std::time::Duration;

use taskdash_proto::notification::{Notification, NotificationId};
use taskdash_proto::task::{
    DeleteAllRequest, NewTask, SubtaskId, SubtaskStatus, Task, TaskFilter, TaskId, UserId,
};
use taskdash_proto::user::User;
use tokio::sync::mpsc;

use crate::api::TaskApi;
use crate::events::{EventSink, SyncEvent};
use crate::notifications::{NotificationError, NotificationPoll, NotificationTracker};
use crate::poll::{PollHandle, spawn_poll_loop};
use crate::tasks::query::{self, Direction, StatusCounts, TaskQuery, UserTasks};
use crate::tasks::store::validate_title;
use crate::tasks::{OptimisticStore, ReconcileReport, TaskError, TaskReconciler};
use crate::transport::Transport;

/// Default interval between task polls.
pub const DEFAULT_TASK_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default interval between notification polls.
pub const DEFAULT_NOTIFICATION_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default capacity of the event channel.
const DEFAULT_EVENT_BUFFER: usize = 64;

/// Timing and buffering for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Interval between task polls.
    pub task_poll_interval: Duration,
    /// Interval between notification polls.
    pub notification_poll_interval: Duration,
    /// Capacity of the [`SyncEvent`] channel.
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            task_poll_interval: DEFAULT_TASK_POLL_INTERVAL,
            notification_poll_interval: DEFAULT_NOTIFICATION_POLL_INTERVAL,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

struct Pollers {
    tasks: PollHandle,
    notifications: PollHandle,
}

/// One logged-in session of the task dashboard.
pub struct Dashboard<T: Transport + 'static> {
    api: Arc<TaskApi<T>>,
    store: Arc<OptimisticStore>,
    tracker: Arc<NotificationTracker>,
    task_source: Arc<TaskReconciler<T>>,
    notification_source: Arc<NotificationPoll<T>>,
    config: SyncConfig,
    pollers: Option<Pollers>,
}

impl<T: Transport + 'static> Dashboard<T> {
    /// Builds a session over `transport`. Nothing is fetched until
    /// [`start`](Self::start) or one of the `refresh_*` calls.
    #[must_use]
    pub fn new(transport: T, config: SyncConfig) -> (Self, mpsc::Receiver<SyncEvent>) {
        let (events, rx) = EventSink::channel(config.event_buffer);
        let api = Arc::new(TaskApi::new(transport));
        let store = Arc::new(OptimisticStore::new(api.user_id(), events.clone()));
        let tracker = Arc::new(NotificationTracker::new(events));
        let task_source = Arc::new(TaskReconciler::new(Arc::clone(&api), Arc::clone(&store)));
        let notification_source = Arc::new(NotificationPoll::new(
            Arc::clone(&api),
            Arc::clone(&tracker),
        ));

        let dashboard = Self {
            api,
            store,
            tracker,
            task_source,
            notification_source,
            config,
            pollers: None,
        };
        (dashboard, rx)
    }

    /// Starts both poll loops. Calling it again has no effect.
    pub fn start(&mut self) {
        if self.pollers.is_some() {
            return;
        }
        tracing::info!(
            user_id = %self.user_id(),
            task_interval = ?self.config.task_poll_interval,
            notification_interval = ?self.config.notification_poll_interval,
            "starting sync"
        );
        let tasks = spawn_poll_loop(
            Arc::clone(&self.task_source),
            self.config.task_poll_interval,
            Some(self.store.refresh_signal()),
        );
        let notifications = spawn_poll_loop(
            Arc::clone(&self.notification_source),
            self.config.notification_poll_interval,
            None,
        );
        self.pollers = Some(Pollers {
            tasks,
            notifications,
        });
    }

    /// Whether the poll loops are running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.pollers.is_some()
    }

    /// The logged-in user.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.api.user_id()
    }

    #[must_use]
    pub const fn api(&self) -> &Arc<TaskApi<T>> {
        &self.api
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<OptimisticStore> {
        &self.store
    }

    #[must_use]
    pub const fn notifications(&self) -> &Arc<NotificationTracker> {
        &self.tracker
    }

    // --- reads ---

    /// Visible state of one task.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.store.get(id)
    }

    /// Visible tasks in one direction that pass `filter`, newest first.
    #[must_use]
    pub fn tasks(&self, direction: Direction, filter: &TaskQuery) -> Vec<Task> {
        let visible = self.store.visible_tasks();
        query::filter(&visible, self.user_id(), direction, filter)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Per-status counts of visible tasks in one direction.
    #[must_use]
    pub fn counts(&self, direction: Direction) -> StatusCounts {
        query::counts(&self.store.visible_tasks(), self.user_id(), direction)
    }

    /// Unread notification count.
    #[must_use]
    pub fn unread(&self) -> usize {
        self.tracker.unread()
    }

    /// Current notification list.
    #[must_use]
    pub fn notification_list(&self) -> Vec<Notification> {
        self.tracker.list()
    }

    // --- explicit refresh ---

    /// Polls the task lists once, outside the regular schedule.
    ///
    /// # Errors
    ///
    /// [`TaskError::TransportFailure`] if either fetch fails. The store is
    /// left untouched in that case.
    pub async fn refresh_tasks(&self) -> Result<ReconcileReport, TaskError> {
        let tasks = self.task_source.fetch_all().await?;
        Ok(self.store.sync_snapshot(tasks))
    }

    /// Polls notifications once, outside the regular schedule.
    ///
    /// # Errors
    ///
    /// [`NotificationError::TransportFailure`] if the fetch fails.
    pub async fn refresh_notifications(&self) -> Result<(), NotificationError> {
        self.tracker.refresh(&self.api).await
    }

    // --- task changes ---

    /// Moves a received task to its next status.
    ///
    /// # Errors
    ///
    /// Local rejections from the store, or [`TaskError::TransportFailure`]
    /// after the change was rolled back.
    pub async fn advance(&self, id: TaskId) -> Result<(), TaskError> {
        self.store.advance(id)?;
        self.store.commit(&self.api, id).await
    }

    /// Cancels a sent task.
    ///
    /// # Errors
    ///
    /// See [`advance`](Self::advance).
    pub async fn cancel(&self, id: TaskId) -> Result<(), TaskError> {
        self.store.cancel(id)?;
        self.store.commit(&self.api, id).await
    }

    /// Cycles one subtask of a received task.
    ///
    /// # Errors
    ///
    /// See [`advance`](Self::advance).
    pub async fn advance_subtask(&self, id: TaskId, subtask: &SubtaskId) -> Result<(), TaskError> {
        self.store.advance_subtask(id, subtask)?;
        self.store.commit(&self.api, id).await
    }

    /// Adds a To-Do subtask to a received task and returns its id.
    ///
    /// # Errors
    ///
    /// See [`advance`](Self::advance).
    pub async fn add_subtask(&self, id: TaskId, title: &str) -> Result<SubtaskId, TaskError> {
        let subtask = self.store.add_subtask(id, title)?;
        self.store.commit(&self.api, id).await?;
        Ok(subtask)
    }

    /// Assigns a new task and starts tracking the server's copy.
    ///
    /// # Errors
    ///
    /// - [`TaskError::EmptyTitle`] or [`TaskError::TitleTooLong`] for the task
    ///   or any subtask title.
    /// - [`TaskError::InvalidTransition`] if an initial subtask is not To-Do.
    /// - [`TaskError::TransportFailure`] if the server refused it.
    pub async fn create_task(&self, mut task: NewTask) -> Result<Task, TaskError> {
        task.title = validate_title(&task.title)?.to_string();
        for subtask in &mut task.subtasks {
            subtask.title = validate_title(&subtask.title)?.to_string();
            if subtask.status != SubtaskStatus::ToDo {
                return Err(TaskError::InvalidTransition(
                    "new subtasks start as To-Do".to_string(),
                ));
            }
        }

        let created = self.api.create_task(&task).await?;
        tracing::info!(task_id = %created.id, receiver = %created.receiver_id, "task created");
        self.store.track(created.clone());
        self.store.refresh_signal().notify_one();
        Ok(created)
    }

    /// Deletes every task on the server. The server checks the re-entered
    /// credentials.
    ///
    /// # Errors
    ///
    /// [`TaskError::TransportFailure`] if the credentials were refused or
    /// the call failed.
    pub async fn delete_all_tasks(
        &self,
        username: &str,
        password: &str,
    ) -> Result<ReconcileReport, TaskError> {
        let request = DeleteAllRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        self.api.delete_all_tasks(&request).await?;
        tracing::warn!(user_id = %self.user_id(), "all tasks deleted");
        self.refresh_tasks().await
    }

    /// Users a task can be assigned to.
    ///
    /// # Errors
    ///
    /// [`TaskError::TransportFailure`] if the fetch fails.
    pub async fn fetch_users(&self) -> Result<Vec<User>, TaskError> {
        Ok(self.api.fetch_users().await?)
    }

    // --- administration ---

    /// Every task that involves `user`, split into received and sent.
    ///
    /// Reads the administrative listing straight from the server, bypassing
    /// the session's own store. Tasks left behind by removed accounts are
    /// skipped.
    ///
    /// # Errors
    ///
    /// [`TaskError::TransportFailure`] if either fetch fails.
    pub async fn user_tasks(&self, user: UserId) -> Result<UserTasks, TaskError> {
        let (tasks, users) = tokio::join!(
            self.api.fetch_tasks(TaskFilter::All),
            self.api.fetch_users()
        );
        Ok(query::user_tasks(tasks?, &users?, user))
    }

    /// Removes a user account. Their tasks stay on the server but drop out
    /// of [`user_tasks`](Self::user_tasks).
    ///
    /// # Errors
    ///
    /// [`TaskError::TransportFailure`] if the server refuses or the call
    /// fails.
    pub async fn delete_user(&self, user: UserId) -> Result<(), TaskError> {
        self.api.delete_user(user).await?;
        tracing::warn!(user_id = %self.user_id(), removed = %user, "user deleted");
        Ok(())
    }

    // --- notifications ---

    /// Marks one notification read.
    ///
    /// # Errors
    ///
    /// See [`NotificationTracker::mark_as_read`].
    pub async fn mark_as_read(&self, id: &NotificationId) -> Result<bool, NotificationError> {
        self.tracker.mark_as_read(&self.api, id).await
    }

    /// Marks every notification read.
    ///
    /// # Errors
    ///
    /// See [`NotificationTracker::mark_all_as_read`].
    pub async fn mark_all_as_read(&self) -> Result<usize, NotificationError> {
        self.tracker.mark_all_as_read(&self.api).await
    }

    // --- teardown ---

    /// Ends the session: stops both poll loops, discards all local state and
    /// waits for the loops to exit. No poll result is applied afterwards.
    pub async fn logout(mut self) {
        tracing::info!(user_id = %self.user_id(), "logging out");
        if let Some(pollers) = &self.pollers {
            pollers.tasks.stop();
            pollers.notifications.stop();
        }
        self.store.close();
        self.tracker.close();
        if let Some(pollers) = self.pollers.take() {
            tokio::join!(pollers.tasks.join(), pollers.notifications.join());
        }
    }
}

impl<T: Transport + 'static> Drop for Dashboard<T> {
    fn drop(&mut self) {
        if let Some(pollers) = self.pollers.take() {
            pollers.tasks.stop();
            pollers.notifications.stop();
            self.store.close();
            self.tracker.close();
        }
    }
}
