//! In-process task server for tests and offline mode.
//!
//! [`MemoryBackend`] holds users, tasks and notifications and answers the
//! same routes as the real server. Each [`MemoryTransport`] connected to it
//! acts as one signed-in user, so several clients can share one backend and
//! observe each other's writes.
//!
//! The backend can be told to fail or to hold requests, which makes poll and
//! mutation races reproducible in tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{NaiveTime, Utc};
use parking_lot::Mutex;
use serde_json::{Value, json};
use taskdash_proto::notification::{Notification, NotificationId};
use taskdash_proto::task::{
    DeleteAllRequest, NewTask, Subtask, Task, TaskFilter, TaskId, TaskPatch, TaskStatus, UserId,
};
use taskdash_proto::user::User;
use tokio::sync::watch;

use super::{Session, Transport, TransportError};

/// A registered account and its password.
struct Account {
    user: User,
    password: String,
}

/// Everything the backend stores.
#[derive(Default)]
struct BackendState {
    accounts: Vec<Account>,
    tasks: BTreeMap<TaskId, Task>,
    /// Recipient and notification, oldest first.
    notifications: Vec<(UserId, Notification)>,
    next_task_id: i64,
    next_notification_id: u64,
}

impl BackendState {
    fn notify(&mut self, recipient: UserId, message: String) {
        self.next_notification_id += 1;
        let notification = Notification {
            id: NotificationId::new(format!("n{}", self.next_notification_id)),
            message,
            is_read: false,
            created_at: Utc::now(),
        };
        self.notifications.push((recipient, notification));
    }

    fn display_name(&self, id: UserId) -> Option<String> {
        self.accounts
            .iter()
            .find(|a| a.user.id == id)
            .map(|a| a.user.display_name().to_string())
    }
}

/// Shared in-memory task server.
pub struct MemoryBackend {
    state: Mutex<BackendState>,
    /// `true` while requests are held at the door.
    gate: watch::Sender<bool>,
    /// Requests currently waiting at the gate.
    held: AtomicUsize,
    /// Remaining requests to fail with a 503.
    fail_next: AtomicUsize,
    /// When set, every request fails with a network error.
    offline: AtomicBool,
    /// Total requests that reached routing.
    served: AtomicUsize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            state: Mutex::new(BackendState {
                next_task_id: 1,
                ..BackendState::default()
            }),
            gate,
            held: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            offline: AtomicBool::new(false),
            served: AtomicUsize::new(0),
        }
    }

    /// Creates a backend seeded with two users and a few tasks between them,
    /// used by the CLI's offline mode. User 1 is `alice`, user 2 is `bob`,
    /// both with password `password`.
    #[must_use]
    pub fn demo() -> Self {
        let backend = Self::new();
        let alice = backend.add_user(UserId::new(1), "alice", "Alice", "password");
        let bob = backend.add_user(UserId::new(2), "bob", "Bob", "password");
        backend.seed_task(&bob, &alice, "Review onboarding doc", TaskStatus::ToDo);
        backend.seed_task(&bob, &alice, "Fix invoice export", TaskStatus::InProgress);
        backend.seed_task(&alice, &bob, "Book venue for offsite", TaskStatus::ToDo);
        backend
    }

    fn seed_task(&self, sender: &User, receiver: &User, title: &str, status: TaskStatus) {
        let mut state = self.state.lock();
        let id = TaskId::new(state.next_task_id);
        state.next_task_id += 1;
        let mut task = Task {
            id,
            sender_id: sender.id,
            receiver_id: receiver.id,
            sender_name: Some(sender.display_name().to_string()),
            receiver_name: Some(receiver.display_name().to_string()),
            title: title.to_string(),
            description: String::new(),
            status: TaskStatus::ToDo,
            subtasks: vec![Subtask::new("First step")],
            created_at: Utc::now(),
            due_date: None,
            completed_at: None,
        };
        task.set_status(status, Utc::now());
        state.tasks.insert(id, task);
    }

    /// Registers an account.
    pub fn add_user(&self, id: UserId, username: &str, name: &str, password: &str) -> User {
        let user = User {
            id,
            username: username.to_string(),
            name: name.to_string(),
            role: None,
        };
        self.state.lock().accounts.push(Account {
            user: user.clone(),
            password: password.to_string(),
        });
        user
    }

    /// Returns a transport that acts as `session.user_id`.
    #[must_use]
    pub fn connect(self: &Arc<Self>, session: Session) -> MemoryTransport {
        MemoryTransport {
            backend: Arc::clone(self),
            session,
        }
    }

    /// Stores a task as-is, replacing any task with the same id.
    pub fn insert_task(&self, task: Task) {
        let mut state = self.state.lock();
        state.next_task_id = state.next_task_id.max(task.id.get() + 1);
        state.tasks.insert(task.id, task);
    }

    /// Returns the stored copy of a task.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.state.lock().tasks.get(&id).cloned()
    }

    /// Changes a task's status behind every client's back.
    pub fn set_task_status(&self, id: TaskId, status: TaskStatus) {
        if let Some(task) = self.state.lock().tasks.get_mut(&id) {
            task.set_status(status, Utc::now());
        }
    }

    /// Hands a task to a different receiver.
    pub fn reassign(&self, id: TaskId, receiver: UserId) {
        let mut state = self.state.lock();
        let name = state.display_name(receiver);
        if let Some(task) = state.tasks.get_mut(&id) {
            task.receiver_id = receiver;
            task.receiver_name = name;
        }
    }

    /// Adds a notification for `recipient`.
    pub fn push_notification(&self, recipient: UserId, message: &str) {
        self.state.lock().notify(recipient, message.to_string());
    }

    /// Returns the stored notifications for `recipient`, oldest first.
    #[must_use]
    pub fn notifications_for(&self, recipient: UserId) -> Vec<Notification> {
        self.state
            .lock()
            .notifications
            .iter()
            .filter(|(to, _)| *to == recipient)
            .map(|(_, n)| n.clone())
            .collect()
    }

    /// Makes the next `count` requests fail with `503 Service Unavailable`.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Makes every request fail with a network error while `offline` is set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Holds every new request until [`release_requests`](Self::release_requests).
    pub fn hold_requests(&self) {
        self.gate.send_replace(true);
    }

    /// Lets held requests through.
    pub fn release_requests(&self) {
        self.gate.send_replace(false);
    }

    /// Number of requests currently waiting at the gate.
    #[must_use]
    pub fn held_requests(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    /// Number of requests that were routed (held or failed ones excluded).
    #[must_use]
    pub fn served_requests(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    async fn handle(
        &self,
        session: &Session,
        method: &str,
        path: &str,
        body: Value,
    ) -> Result<Value, TransportError> {
        let mut gate = self.gate.subscribe();
        if *gate.borrow_and_update() {
            self.held.fetch_add(1, Ordering::SeqCst);
            let released = gate.wait_for(|held| !*held).await.is_ok();
            self.held.fetch_sub(1, Ordering::SeqCst);
            if !released {
                return Err(TransportError::Network("backend shut down".to_string()));
            }
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Network("connection refused".to_string()));
        }
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(status(503, "Service Unavailable"));
        }

        self.served.fetch_add(1, Ordering::SeqCst);
        self.route(session, method, path, body)
    }

    fn route(
        &self,
        session: &Session,
        method: &str,
        path: &str,
        body: Value,
    ) -> Result<Value, TransportError> {
        let (route, query) = path.split_once('?').unwrap_or((path, ""));
        let segments: Vec<&str> = route.split('/').filter(|s| !s.is_empty()).collect();
        let user = session.user_id;

        match (method, segments.as_slice()) {
            ("GET", ["users"]) => self.list_users(),
            ("DELETE", ["users", id]) => {
                let id = id
                    .parse::<UserId>()
                    .map_err(|_| status(400, "Invalid user id"))?;
                self.delete_user(user, id)
            }
            ("GET", ["tasks"]) => self.list_tasks(user, query),
            ("POST", ["tasks"]) => self.create_task(user, serde_json::from_value(body)?),
            ("POST", ["tasks", "delete-all"]) => {
                self.delete_all(user, &serde_json::from_value(body)?)
            }
            ("PUT", ["tasks", id]) => {
                let id = id
                    .parse::<TaskId>()
                    .map_err(|_| status(400, "Invalid task id"))?;
                self.update_task(user, id, serde_json::from_value(body)?)
            }
            ("GET", ["notifications"]) => self.list_notifications(user),
            ("PUT", ["notifications", "mark-all-read"]) => self.mark_all_read(user),
            ("PUT", ["notifications", id, "read"]) => self.mark_read(user, id),
            _ => Err(status(404, "Not found")),
        }
    }

    fn list_users(&self) -> Result<Value, TransportError> {
        let state = self.state.lock();
        let users: Vec<&User> = state.accounts.iter().map(|a| &a.user).collect();
        Ok(serde_json::to_value(users)?)
    }

    fn delete_user(&self, caller: UserId, id: UserId) -> Result<Value, TransportError> {
        if caller == id {
            return Err(status(400, "Cannot delete your own account"));
        }
        let mut state = self.state.lock();
        let before = state.accounts.len();
        state.accounts.retain(|a| a.user.id != id);
        if state.accounts.len() == before {
            return Err(status(404, "User not found"));
        }
        state.notifications.retain(|(to, _)| *to != id);
        Ok(json!({ "message": "User deleted" }))
    }

    fn list_tasks(&self, user: UserId, query: &str) -> Result<Value, TransportError> {
        let filter = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "type")
            .map_or(Ok(TaskFilter::Received), |(_, value)| value.parse())
            .map_err(|_| status(400, "Invalid task type"))?;

        let state = self.state.lock();
        let mut tasks: Vec<&Task> = state
            .tasks
            .values()
            .filter(|t| match filter {
                TaskFilter::Received => t.receiver_id == user,
                TaskFilter::Sent => t.sender_id == user,
                TaskFilter::All => true,
            })
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(serde_json::to_value(tasks)?)
    }

    fn create_task(&self, sender: UserId, new: NewTask) -> Result<Value, TransportError> {
        if new.title.trim().is_empty() {
            return Err(status(400, "Title is required"));
        }
        let mut state = self.state.lock();
        if !state.accounts.iter().any(|a| a.user.id == new.receiver_id) {
            return Err(status(400, "Unknown receiver"));
        }

        let id = TaskId::new(state.next_task_id);
        state.next_task_id += 1;
        let task = Task {
            id,
            sender_id: sender,
            receiver_id: new.receiver_id,
            sender_name: state.display_name(sender),
            receiver_name: state.display_name(new.receiver_id),
            title: new.title,
            description: new.description,
            status: TaskStatus::ToDo,
            subtasks: new.subtasks,
            created_at: Utc::now(),
            due_date: new
                .due_date
                .map(|date| date.and_time(NaiveTime::MIN).and_utc()),
            completed_at: None,
        };
        state.notify(
            task.receiver_id,
            format!("New task assigned: {}", task.title),
        );
        state.tasks.insert(id, task.clone());
        Ok(serde_json::to_value(task)?)
    }

    fn update_task(
        &self,
        user: UserId,
        id: TaskId,
        patch: TaskPatch,
    ) -> Result<Value, TransportError> {
        let mut state = self.state.lock();
        let Some(task) = state.tasks.get_mut(&id) else {
            return Err(status(404, "Task not found"));
        };
        if !task.involves(user) {
            return Err(status(403, "Not allowed to update this task"));
        }
        if let Some(next) = patch.status
            && task.is_terminal()
            && next != task.status
        {
            return Err(status(400, "Task is already closed"));
        }

        let mut announcement = None;
        if let Some(next) = patch.status
            && next != task.status
        {
            task.set_status(next, Utc::now());
            let recipient = if user == task.receiver_id {
                task.sender_id
            } else {
                task.receiver_id
            };
            announcement = Some((
                recipient,
                format!("Task \"{}\" is now {}", task.title, task.status),
            ));
        }
        if let Some(subtasks) = patch.subtasks {
            task.subtasks = subtasks;
        }
        let updated = task.clone();
        if let Some((recipient, message)) = announcement {
            state.notify(recipient, message);
        }
        Ok(serde_json::to_value(updated)?)
    }

    fn delete_all(&self, user: UserId, request: &DeleteAllRequest) -> Result<Value, TransportError> {
        let mut state = self.state.lock();
        let verified = state.accounts.iter().any(|a| {
            a.user.id == user
                && a.user.username == request.username
                && a.password == request.password
        });
        if !verified {
            return Err(status(401, "Invalid credentials"));
        }
        let removed = state.tasks.len();
        state.tasks.clear();
        Ok(json!({ "message": format!("Deleted {removed} tasks") }))
    }

    fn list_notifications(&self, user: UserId) -> Result<Value, TransportError> {
        let state = self.state.lock();
        let list: Vec<&Notification> = state
            .notifications
            .iter()
            .rev()
            .filter(|(to, _)| *to == user)
            .map(|(_, n)| n)
            .collect();
        Ok(serde_json::to_value(list)?)
    }

    fn mark_read(&self, user: UserId, id: &str) -> Result<Value, TransportError> {
        let mut state = self.state.lock();
        let notification = state
            .notifications
            .iter_mut()
            .find(|(to, n)| *to == user && n.id.as_str() == id)
            .map(|(_, n)| n)
            .ok_or_else(|| status(404, "Notification not found"))?;
        notification.mark_read();
        Ok(serde_json::to_value(&*notification)?)
    }

    fn mark_all_read(&self, user: UserId) -> Result<Value, TransportError> {
        let mut state = self.state.lock();
        for (_, notification) in state.notifications.iter_mut().filter(|(to, _)| *to == user) {
            notification.mark_read();
        }
        Ok(json!({ "message": "All notifications marked as read" }))
    }
}

fn status(status: u16, message: &str) -> TransportError {
    TransportError::Status {
        status,
        message: message.to_string(),
    }
}

/// A [`Transport`] bound to one user of a shared [`MemoryBackend`].
pub struct MemoryTransport {
    backend: Arc<MemoryBackend>,
    session: Session,
}

impl MemoryTransport {
    /// The backend this transport talks to.
    #[must_use]
    pub const fn backend(&self) -> &Arc<MemoryBackend> {
        &self.backend
    }
}

impl Transport for MemoryTransport {
    async fn get(&self, path: &str) -> Result<Value, TransportError> {
        self.backend
            .handle(&self.session, "GET", path, Value::Null)
            .await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, TransportError> {
        self.backend.handle(&self.session, "POST", path, body).await
    }

    async fn put(&self, path: &str, body: Value) -> Result<Value, TransportError> {
        self.backend.handle(&self.session, "PUT", path, body).await
    }

    async fn delete(&self, path: &str) -> Result<Value, TransportError> {
        self.backend
            .handle(&self.session, "DELETE", path, Value::Null)
            .await
    }

    fn session(&self) -> &Session {
        &self.session
    }
}
