//! Status transition rules for tasks and subtasks.
//!
//! Pure functions: they answer whether a transition is structurally valid,
//! not whether the current user may request it.

use taskdash_proto::task::{SubtaskStatus, TaskStatus};

/// The status the "advance" action moves a task to.
///
/// To-Do advances to In Progress, In Progress to Completed. Completed and
/// Canceled are terminal and cannot be advanced (`None`). Canceled is only
/// reachable through [`can_cancel`].
#[must_use]
pub const fn next_task_status(current: TaskStatus) -> Option<TaskStatus> {
    match current {
        TaskStatus::ToDo => Some(TaskStatus::InProgress),
        TaskStatus::InProgress => Some(TaskStatus::Completed),
        TaskStatus::Completed | TaskStatus::Canceled => None,
    }
}

/// Whether the task can be advanced from `current`.
#[must_use]
pub const fn can_advance(current: TaskStatus) -> bool {
    next_task_status(current).is_some()
}

/// Whether the task can be canceled from `current`.
#[must_use]
pub const fn can_cancel(current: TaskStatus) -> bool {
    !current.is_terminal()
}

/// The status the "advance" action moves a subtask to. Subtasks cycle
/// To-Do, In Progress, Completed, To-Do with no terminal state.
#[must_use]
pub const fn next_subtask_status(current: SubtaskStatus) -> SubtaskStatus {
    match current {
        SubtaskStatus::ToDo => SubtaskStatus::InProgress,
        SubtaskStatus::InProgress => SubtaskStatus::Completed,
        SubtaskStatus::Completed => SubtaskStatus::ToDo,
    }
}
