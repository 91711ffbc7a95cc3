//! Optimistic per-task state with rollback.
//!
//! `OptimisticStore` holds one [`ClientView`] per tracked task. A view has
//! one pending slot: a local change occupies it from
//! [`apply_local`](OptimisticStore::apply_local) until
//! [`commit`](OptimisticStore::commit) resolves, and a second change to the
//! same task is refused while it is occupied. Poll results that arrive in
//! the meantime are held back until the pending change resolves.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use taskdash_proto::task::{
    MAX_TASK_TITLE_LENGTH, Subtask, SubtaskId, SubtaskStatus, Task, TaskId, TaskPatch, TaskStatus,
    UserId,
};
use tokio::sync::Notify;

use super::TaskError;
use super::status::{can_cancel, next_subtask_status, next_task_status};
use crate::api::TaskApi;
use crate::events::{EventSink, SyncEvent};
use crate::transport::{Transport, TransportError};

/// A local change to one task's mutable fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Move the task to a new status.
    Status(TaskStatus),
    /// Replace the subtask list.
    Subtasks(Vec<Subtask>),
}

impl Mutation {
    /// The partial-update body that carries this change to the server.
    #[must_use]
    pub fn to_patch(&self) -> TaskPatch {
        match self {
            Self::Status(status) => TaskPatch {
                status: Some(*status),
                subtasks: None,
            },
            Self::Subtasks(list) => TaskPatch {
                status: None,
                subtasks: Some(list.clone()),
            },
        }
    }

    fn apply_to(&self, task: &mut Task) {
        match self {
            Self::Status(status) => task.set_status(*status, Utc::now()),
            Self::Subtasks(list) => task.subtasks.clone_from(list),
        }
    }
}

/// Poll result withheld while a change is in flight.
#[derive(Debug, Clone)]
enum Held {
    /// The task was in the poll with this content.
    Snapshot(Task),
    /// The task was missing from the poll.
    Gone,
}

#[derive(Debug, Clone)]
struct Pending {
    mutation: Mutation,
    tentative: Task,
    rollback: Task,
    /// Set once `commit` has sent the change.
    in_flight: bool,
    held: Option<Held>,
}

/// The client's belief about one task.
#[derive(Debug, Clone)]
pub struct ClientView {
    authoritative: Task,
    pending: Option<Pending>,
}

impl ClientView {
    fn new(authoritative: Task) -> Self {
        Self {
            authoritative,
            pending: None,
        }
    }

    /// What readers should see: the tentative state while a change is
    /// pending, otherwise the authoritative snapshot.
    #[must_use]
    pub fn visible(&self) -> &Task {
        self.pending
            .as_ref()
            .map_or(&self.authoritative, |p| &p.tentative)
    }

    /// The last state confirmed by the server.
    #[must_use]
    pub const fn authoritative(&self) -> &Task {
        &self.authoritative
    }

    /// Whether a local change is waiting to resolve.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// The pending change, if any.
    #[must_use]
    pub fn pending_mutation(&self) -> Option<&Mutation> {
        self.pending.as_ref().map(|p| &p.mutation)
    }
}

/// What [`OptimisticStore::reconcile`] did with a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// The snapshot replaced a different authoritative copy.
    Changed,
    /// The snapshot matched what was already held.
    Unchanged,
    /// A change is in flight; the snapshot is held until it resolves.
    Deferred,
    /// No view exists for the task; nothing was done.
    Untracked,
}

/// Summary of one poll merged by [`OptimisticStore::sync_snapshot`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Tasks seen for the first time.
    pub added: Vec<TaskId>,
    /// Tasks whose authoritative copy changed.
    pub changed: Vec<TaskId>,
    /// Tasks dropped because the poll no longer lists them.
    pub evicted: Vec<TaskId>,
    /// Tasks whose poll result is held behind an in-flight change.
    pub deferred: Vec<TaskId>,
}

#[derive(Debug, Default)]
struct Views {
    tasks: HashMap<TaskId, ClientView>,
    /// Set on logout. Checked under the same lock as every write.
    closed: bool,
}

/// Per-session store of task views.
pub struct OptimisticStore {
    user: UserId,
    views: Mutex<Views>,
    events: EventSink,
    refresh: Arc<Notify>,
}

impl OptimisticStore {
    /// Creates an empty store for `user`.
    #[must_use]
    pub fn new(user: UserId, events: EventSink) -> Self {
        Self {
            user,
            views: Mutex::new(Views::default()),
            events,
            refresh: Arc::new(Notify::new()),
        }
    }

    /// The user whose role is checked against every change.
    #[must_use]
    pub const fn user(&self) -> UserId {
        self.user
    }

    /// Signal fired after a confirmed change, asking for an immediate poll.
    #[must_use]
    pub fn refresh_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.refresh)
    }

    /// The visible state of a task.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.views.lock().tasks.get(&id).map(|v| v.visible().clone())
    }

    /// A copy of the full view of a task.
    #[must_use]
    pub fn view(&self, id: TaskId) -> Option<ClientView> {
        self.views.lock().tasks.get(&id).cloned()
    }

    /// Whether a change to the task is waiting to resolve.
    #[must_use]
    pub fn is_pending(&self, id: TaskId) -> bool {
        self.views
            .lock()
            .tasks
            .get(&id)
            .is_some_and(ClientView::is_pending)
    }

    /// Visible state of every tracked task, newest first.
    #[must_use]
    pub fn visible_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .views
            .lock()
            .tasks
            .values()
            .map(|v| v.visible().clone())
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        tasks
    }

    /// Number of tracked tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.views.lock().tasks.len()
    }

    /// Whether no task is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.views.lock().tasks.is_empty()
    }

    /// Discards every view and ignores all later writes. Called on logout.
    pub fn close(&self) {
        let mut views = self.views.lock();
        views.closed = true;
        views.tasks.clear();
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.views.lock().closed
    }

    // --- local changes ---

    /// Applies a local change optimistically.
    ///
    /// The change becomes visible at once and occupies the task's pending
    /// slot until [`commit`](Self::commit) resolves it.
    ///
    /// # Errors
    ///
    /// - [`TaskError::TaskNotFound`] if the task is not tracked.
    /// - [`TaskError::MutationInProgress`] if a change is already pending.
    /// - [`TaskError::NotAuthorized`] if the user's role forbids the change.
    /// - [`TaskError::InvalidTransition`] if the change is structurally invalid.
    ///
    /// On error nothing changes.
    pub fn apply_local(&self, id: TaskId, mutation: Mutation) -> Result<(), TaskError> {
        self.apply_with(id, |_, _| Ok(mutation))
    }

    /// Advances the task's status (receiver only).
    ///
    /// # Errors
    ///
    /// See [`apply_local`](Self::apply_local).
    pub fn advance(&self, id: TaskId) -> Result<(), TaskError> {
        self.apply_with(id, |user, task| {
            require_receiver(user, task, "only the receiver can progress a task")?;
            next_task_status(task.status)
                .map(Mutation::Status)
                .ok_or_else(|| {
                    TaskError::InvalidTransition(format!("{} tasks cannot advance", task.status))
                })
        })
    }

    /// Cancels the task (sender only).
    ///
    /// # Errors
    ///
    /// See [`apply_local`](Self::apply_local).
    pub fn cancel(&self, id: TaskId) -> Result<(), TaskError> {
        self.apply_with(id, |_, _| Ok(Mutation::Status(TaskStatus::Canceled)))
    }

    /// Advances one subtask's status (receiver only).
    ///
    /// # Errors
    ///
    /// [`TaskError::SubtaskNotFound`] if the subtask does not exist, plus
    /// everything [`apply_local`](Self::apply_local) returns.
    pub fn advance_subtask(&self, id: TaskId, subtask: &SubtaskId) -> Result<(), TaskError> {
        self.apply_with(id, |user, task| {
            require_receiver(user, task, "only the receiver can update subtasks")?;
            if task.subtask(subtask).is_none() {
                return Err(TaskError::SubtaskNotFound(subtask.clone()));
            }
            let list = task
                .subtasks
                .iter()
                .map(|s| {
                    let mut s = s.clone();
                    if &s.id == subtask {
                        s.status = next_subtask_status(s.status);
                    }
                    s
                })
                .collect();
            Ok(Mutation::Subtasks(list))
        })
    }

    /// Appends a new To-Do subtask (receiver only) and returns its id.
    ///
    /// # Errors
    ///
    /// [`TaskError::EmptyTitle`] or [`TaskError::TitleTooLong`] for a bad
    /// title, plus everything [`apply_local`](Self::apply_local) returns.
    pub fn add_subtask(&self, id: TaskId, title: &str) -> Result<SubtaskId, TaskError> {
        let title = validate_title(title)?;
        let mut created = None;
        self.apply_with(id, |user, task| {
            require_receiver(user, task, "only the receiver can add subtasks")?;
            let mut subtask = Subtask::new(title);
            while task.subtask(&subtask.id).is_some() {
                subtask.id = SubtaskId::generate();
            }
            created = Some(subtask.id.clone());
            let mut list = task.subtasks.clone();
            list.push(subtask);
            Ok(Mutation::Subtasks(list))
        })?;
        created.ok_or(TaskError::TaskNotFound(id))
    }

    /// Runs `build` against the authoritative task and, if the resulting
    /// change passes the role and transition checks, makes it pending.
    fn apply_with<F>(&self, id: TaskId, build: F) -> Result<(), TaskError>
    where
        F: FnOnce(UserId, &Task) -> Result<Mutation, TaskError>,
    {
        let mut views = self.views.lock();
        let view = views
            .tasks
            .get_mut(&id)
            .ok_or(TaskError::TaskNotFound(id))?;
        if view.pending.is_some() {
            return Err(TaskError::MutationInProgress(id));
        }

        let mutation = build(self.user, &view.authoritative)?;
        authorize(self.user, &view.authoritative, &mutation)?;

        let mut tentative = view.authoritative.clone();
        mutation.apply_to(&mut tentative);
        tracing::debug!(task_id = %id, ?mutation, "applied local change");
        view.pending = Some(Pending {
            mutation,
            tentative,
            rollback: view.authoritative.clone(),
            in_flight: false,
            held: None,
        });
        drop(views);

        self.events.emit(SyncEvent::MutationApplied { task_id: id });
        Ok(())
    }

    /// Sends the task's pending change to the server and resolves it.
    ///
    /// On success the tentative state becomes authoritative and a refresh
    /// is requested. On failure the pre-change snapshot is restored and
    /// [`SyncEvent::MutationFailed`] is emitted. Dropping the returned
    /// future before the server answers counts as a failure.
    ///
    /// # Errors
    ///
    /// - [`TaskError::TransportFailure`] if the server call failed (after rollback).
    /// - [`TaskError::NothingPending`] if no change is waiting.
    /// - [`TaskError::MutationInProgress`] if the change was already sent.
    /// - [`TaskError::TaskNotFound`] if the task is not tracked.
    pub async fn commit<T: Transport>(
        &self,
        api: &TaskApi<T>,
        id: TaskId,
    ) -> Result<(), TaskError> {
        let patch = {
            let mut views = self.views.lock();
            let view = views
                .tasks
                .get_mut(&id)
                .ok_or(TaskError::TaskNotFound(id))?;
            let pending = view
                .pending
                .as_mut()
                .ok_or(TaskError::NothingPending(id))?;
            if pending.in_flight {
                return Err(TaskError::MutationInProgress(id));
            }
            pending.in_flight = true;
            pending.mutation.to_patch()
        };

        let guard = InFlight { store: self, id };
        let result = api.update_task(id, &patch).await;
        std::mem::forget(guard);
        self.resolve(id, result)
    }

    /// Settles the pending change of `id` with the server's answer.
    fn resolve(&self, id: TaskId, result: Result<(), TransportError>) -> Result<(), TaskError> {
        let mut views = self.views.lock();
        if views.closed {
            tracing::debug!(task_id = %id, "store closed, dropping commit outcome");
            return result.map_err(TaskError::from);
        }
        let Some(view) = views.tasks.get_mut(&id) else {
            return result.map_err(TaskError::from);
        };
        let Some(pending) = view.pending.take() else {
            return result.map_err(TaskError::from);
        };

        match result {
            Ok(()) => {
                // Anything polled while in flight predates this write.
                view.authoritative = pending.tentative;
                drop(views);
                tracing::debug!(task_id = %id, "change confirmed");
                self.events.emit(SyncEvent::MutationConfirmed { task_id: id });
                self.events.emit(SyncEvent::RefreshRequested);
                self.refresh.notify_one();
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                tracing::warn!(task_id = %id, error = %message, "change rejected, rolling back");
                view.authoritative = pending.rollback;
                let evicted = match pending.held {
                    Some(Held::Snapshot(snapshot)) => {
                        view.authoritative = snapshot;
                        false
                    }
                    Some(Held::Gone) => {
                        views.tasks.remove(&id);
                        true
                    }
                    None => false,
                };
                drop(views);
                self.events.emit(SyncEvent::MutationFailed {
                    task_id: id,
                    message: message.clone(),
                });
                if evicted {
                    self.events.emit(SyncEvent::TaskEvicted { task_id: id });
                }
                Err(TaskError::TransportFailure(message))
            }
        }
    }

    // --- reconciliation ---

    /// Merges a freshly polled snapshot into an existing view.
    ///
    /// Without a pending change the snapshot replaces the authoritative copy.
    /// With one, it is held until the change resolves. Untracked tasks are
    /// ignored; use [`track`](Self::track) to start tracking.
    pub fn reconcile(&self, snapshot: Task) -> Reconciled {
        let id = snapshot.id;
        let mut views = self.views.lock();
        if views.closed {
            return Reconciled::Untracked;
        }
        let Some(view) = views.tasks.get_mut(&id) else {
            return Reconciled::Untracked;
        };
        let outcome = merge_into(view, snapshot);
        if outcome == Reconciled::Changed {
            self.events.emit(SyncEvent::TaskChanged { task_id: id });
        }
        outcome
    }

    /// Starts tracking a task, or reconciles it if already tracked.
    pub fn track(&self, snapshot: Task) -> Reconciled {
        let id = snapshot.id;
        let mut views = self.views.lock();
        if views.closed {
            return Reconciled::Untracked;
        }
        if let Some(view) = views.tasks.get_mut(&id) {
            let outcome = merge_into(view, snapshot);
            if outcome == Reconciled::Changed {
                self.events.emit(SyncEvent::TaskChanged { task_id: id });
            }
            return outcome;
        }
        views.tasks.insert(id, ClientView::new(snapshot));
        tracing::debug!(task_id = %id, "tracking new task");
        self.events.emit(SyncEvent::TaskAdded { task_id: id });
        Reconciled::Changed
    }

    /// Merges a complete poll result.
    ///
    /// Listed tasks are tracked or reconciled; tracked tasks missing from the
    /// list are evicted, except those with a change in flight, whose
    /// eviction waits for the change to resolve.
    pub fn sync_snapshot(&self, snapshots: Vec<Task>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        // Events go out under the lock so nothing is reported after close.
        let mut views = self.views.lock();
        if views.closed {
            return report;
        }

        let present: HashSet<TaskId> = snapshots.iter().map(|t| t.id).collect();
        for snapshot in snapshots {
            let id = snapshot.id;
            match views.tasks.get_mut(&id) {
                Some(view) => match merge_into(view, snapshot) {
                    Reconciled::Changed => report.changed.push(id),
                    Reconciled::Deferred => report.deferred.push(id),
                    Reconciled::Unchanged | Reconciled::Untracked => {}
                },
                None => {
                    views.tasks.insert(id, ClientView::new(snapshot));
                    report.added.push(id);
                }
            }
        }

        let absent: Vec<TaskId> = views
            .tasks
            .keys()
            .filter(|id| !present.contains(id))
            .copied()
            .collect();
        for id in absent {
            let Some(view) = views.tasks.get_mut(&id) else {
                continue;
            };
            if let Some(pending) = view.pending.as_mut() {
                pending.held = Some(Held::Gone);
                report.deferred.push(id);
            } else {
                views.tasks.remove(&id);
                report.evicted.push(id);
            }
        }

        for &task_id in &report.added {
            self.events.emit(SyncEvent::TaskAdded { task_id });
        }
        for &task_id in &report.changed {
            self.events.emit(SyncEvent::TaskChanged { task_id });
        }
        for &task_id in &report.evicted {
            tracing::debug!(%task_id, "task no longer listed, evicting");
            self.events.emit(SyncEvent::TaskEvicted { task_id });
        }
        drop(views);
        report
    }
}

/// Rolls a sent change back if [`OptimisticStore::commit`] is dropped
/// before the server answers. Forgotten once the answer is in.
struct InFlight<'a> {
    store: &'a OptimisticStore,
    id: TaskId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        tracing::warn!(task_id = %self.id, "commit abandoned before the server answered");
        let abandoned = TransportError::Network("request abandoned before a response".to_string());
        let _ = self.store.resolve(self.id, Err(abandoned));
    }
}

fn merge_into(view: &mut ClientView, snapshot: Task) -> Reconciled {
    if let Some(pending) = view.pending.as_mut() {
        pending.held = Some(Held::Snapshot(snapshot));
        return Reconciled::Deferred;
    }
    if view.authoritative == snapshot {
        Reconciled::Unchanged
    } else {
        view.authoritative = snapshot;
        Reconciled::Changed
    }
}

fn require_receiver(user: UserId, task: &Task, reason: &str) -> Result<(), TaskError> {
    if task.receiver_id == user {
        Ok(())
    } else {
        Err(TaskError::NotAuthorized(reason.to_string()))
    }
}

pub(crate) fn validate_title(title: &str) -> Result<&str, TaskError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(TaskError::EmptyTitle);
    }
    if title.chars().count() > MAX_TASK_TITLE_LENGTH {
        return Err(TaskError::TitleTooLong);
    }
    Ok(title)
}

/// Checks that `user` may apply `mutation` to `task` and that the change is
/// a valid transition.
///
/// Receivers progress the task and edit subtasks; senders may only cancel.
fn authorize(user: UserId, task: &Task, mutation: &Mutation) -> Result<(), TaskError> {
    match mutation {
        Mutation::Status(TaskStatus::Canceled) => {
            if task.sender_id != user {
                return Err(TaskError::NotAuthorized(
                    "only the sender can cancel a task".to_string(),
                ));
            }
            if !can_cancel(task.status) {
                return Err(TaskError::InvalidTransition(format!(
                    "{} tasks cannot be canceled",
                    task.status
                )));
            }
            Ok(())
        }
        Mutation::Status(target) => {
            require_receiver(user, task, "only the receiver can progress a task")?;
            if next_task_status(task.status) == Some(*target) {
                Ok(())
            } else {
                Err(TaskError::InvalidTransition(format!(
                    "{} cannot move to {target}",
                    task.status
                )))
            }
        }
        Mutation::Subtasks(list) => {
            require_receiver(user, task, "only the receiver can update subtasks")?;
            validate_subtasks(task, list)
        }
    }
}

/// A replacement subtask list may change existing statuses by one step and
/// append new To-Do items. Nothing is removed, renamed or duplicated.
fn validate_subtasks(task: &Task, list: &[Subtask]) -> Result<(), TaskError> {
    if list == task.subtasks.as_slice() {
        return Err(TaskError::InvalidTransition(
            "subtask list is unchanged".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for subtask in list {
        if !seen.insert(&subtask.id) {
            return Err(TaskError::InvalidTransition(format!(
                "duplicate subtask id {}",
                subtask.id
            )));
        }
        match task.subtask(&subtask.id) {
            Some(existing) => {
                if existing.title != subtask.title {
                    return Err(TaskError::InvalidTransition(format!(
                        "subtask {} cannot be renamed",
                        subtask.id
                    )));
                }
                if subtask.status != existing.status
                    && subtask.status != next_subtask_status(existing.status)
                {
                    return Err(TaskError::InvalidTransition(format!(
                        "subtask {} cannot move from {} to {}",
                        subtask.id, existing.status, subtask.status
                    )));
                }
            }
            None => {
                if task.is_terminal() {
                    return Err(TaskError::InvalidTransition(format!(
                        "cannot add subtasks to a {} task",
                        task.status
                    )));
                }
                validate_title(&subtask.title)?;
                if subtask.status != SubtaskStatus::ToDo {
                    return Err(TaskError::InvalidTransition(
                        "new subtasks start as To-Do".to_string(),
                    ));
                }
            }
        }
    }

    if let Some(missing) = task.subtasks.iter().find(|s| !seen.contains(&s.id)) {
        return Err(TaskError::InvalidTransition(format!(
            "subtask {} cannot be removed",
            missing.id
        )));
    }
    Ok(())
}
