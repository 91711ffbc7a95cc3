//! Optimistic task synchronization.
//!
//! The client keeps one [`ClientView`] per task: the last authoritative
//! snapshot from the server plus at most one in-flight local change. Local
//! changes show up immediately, are committed to the server, and roll back
//! if the server refuses them. Periodic polls reconcile the views with the
//! server without clobbering a change that is still in flight.

pub mod query;
pub mod reconcile;
pub mod status;
pub mod store;

pub use reconcile::TaskReconciler;
pub use store::{ClientView, Mutation, OptimisticStore, ReconcileReport, Reconciled};

use taskdash_proto::task::{SubtaskId, TaskId};
use thiserror::Error;

use crate::transport::TransportError;

/// Errors that can occur during task operations.
///
/// Everything except [`TaskError::TransportFailure`] is detected locally
/// and never reaches the network.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    /// The requested status or subtask change is not a valid transition.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    /// The current user's role on the task does not allow the change.
    #[error("not permitted: {0}")]
    NotAuthorized(String),
    /// Another change to the same task has not resolved yet.
    #[error("a change to task {0} is still in flight")]
    MutationInProgress(TaskId),
    /// The server call failed; the local change was rolled back.
    #[error("request failed: {0}")]
    TransportFailure(String),
    /// No view is held for the task.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    /// The task has no subtask with the given id.
    #[error("subtask not found: {0}")]
    SubtaskNotFound(SubtaskId),
    /// `commit` was called with no local change waiting.
    #[error("task {0} has no pending change to commit")]
    NothingPending(TaskId),
    /// Title is empty or whitespace.
    #[error("title cannot be empty")]
    EmptyTitle,
    /// Title exceeds the maximum length.
    #[error("title too long (max 256 characters)")]
    TitleTooLong,
}

impl TaskError {
    /// Whether the error was raised locally, before any network call.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        !matches!(self, Self::TransportFailure(_))
    }
}

impl From<TransportError> for TaskError {
    fn from(err: TransportError) -> Self {
        Self::TransportFailure(err.to_string())
    }
}
