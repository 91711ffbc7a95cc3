//! Read-side helpers over the visible task list and the administrative
//! listing of every task.

use std::collections::HashSet;

use taskdash_proto::task::{Task, TaskStatus, UserId};
use taskdash_proto::user::User;

/// Which side of the assignment the current user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Tasks assigned to the user.
    Received,
    /// Tasks the user assigned to someone.
    Sent,
}

/// Filter applied to one direction of the task list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    /// Keep only tasks in this status.
    pub status: Option<TaskStatus>,
    /// Case-insensitive substring of the counterpart's name or the title.
    pub search: Option<String>,
}

impl TaskQuery {
    /// Whether `task` passes the filter, seen from `direction`.
    #[must_use]
    pub fn matches(&self, task: &Task, direction: Direction) -> bool {
        if self.status.is_some_and(|s| s != task.status) {
            return false;
        }
        let Some(needle) = self.search.as_deref().map(str::trim) else {
            return true;
        };
        if needle.is_empty() {
            return true;
        }
        let needle = needle.to_lowercase();
        let counterpart = match direction {
            Direction::Received => task.sender_name.as_deref(),
            Direction::Sent => task.receiver_name.as_deref(),
        };
        counterpart.is_some_and(|name| name.to_lowercase().contains(&needle))
            || task.title.to_lowercase().contains(&needle)
    }
}

/// Tasks in `tasks` that belong to `direction` for `user` and pass `query`.
///
/// A self-assigned task appears in both directions.
#[must_use]
pub fn filter<'a>(
    tasks: &'a [Task],
    user: UserId,
    direction: Direction,
    query: &TaskQuery,
) -> Vec<&'a Task> {
    tasks
        .iter()
        .filter(|t| belongs(t, user, direction) && query.matches(t, direction))
        .collect()
}

/// Number of tasks per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub to_do: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub canceled: usize,
}

impl StatusCounts {
    /// Count for one status.
    #[must_use]
    pub const fn get(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::ToDo => self.to_do,
            TaskStatus::InProgress => self.in_progress,
            TaskStatus::Completed => self.completed,
            TaskStatus::Canceled => self.canceled,
        }
    }

    /// Tasks that are not in a terminal status.
    #[must_use]
    pub const fn open(&self) -> usize {
        self.to_do + self.in_progress
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.to_do + self.in_progress + self.completed + self.canceled
    }
}

/// Per-status counts of the tasks in `direction` for `user`.
#[must_use]
pub fn counts(tasks: &[Task], user: UserId, direction: Direction) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for task in tasks.iter().filter(|t| belongs(t, user, direction)) {
        match task.status {
            TaskStatus::ToDo => counts.to_do += 1,
            TaskStatus::InProgress => counts.in_progress += 1,
            TaskStatus::Completed => counts.completed += 1,
            TaskStatus::Canceled => counts.canceled += 1,
        }
    }
    counts
}

/// One user's slice of the administrative listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserTasks {
    /// Tasks assigned to the user.
    pub received: Vec<Task>,
    /// Tasks the user assigned.
    pub sent: Vec<Task>,
}

/// Drops tasks whose sender or receiver is not among `users`, i.e. tasks
/// left behind by removed accounts.
#[must_use]
pub fn active_only(tasks: Vec<Task>, users: &[User]) -> Vec<Task> {
    let active: HashSet<UserId> = users.iter().map(|u| u.id).collect();
    tasks
        .into_iter()
        .filter(|t| active.contains(&t.sender_id) && active.contains(&t.receiver_id))
        .collect()
}

/// Splits the full task listing into what `user` received and sent,
/// skipping tasks that involve removed accounts.
#[must_use]
pub fn user_tasks(tasks: Vec<Task>, users: &[User], user: UserId) -> UserTasks {
    let mut split = UserTasks::default();
    for task in active_only(tasks, users) {
        match (task.receiver_id == user, task.sender_id == user) {
            (true, true) => {
                split.sent.push(task.clone());
                split.received.push(task);
            }
            (true, false) => split.received.push(task),
            (false, true) => split.sent.push(task),
            (false, false) => {}
        }
    }
    split
}

fn belongs(task: &Task, user: UserId, direction: Direction) -> bool {
    match direction {
        Direction::Received => task.receiver_id == user,
        Direction::Sent => task.sender_id == user,
    }
}
