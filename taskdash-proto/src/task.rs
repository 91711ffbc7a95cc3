//! Task and subtask wire types.
//!
//! A [`Task`] is owned by the server and arrives as a JSON snapshot. Clients
//! change it only through [`TaskPatch`] partial updates (status and/or the
//! whole subtask list). Status names follow the server's spelling:
//! `"To-Do"`, `"In Progress"`, `"Completed"`, `"Canceled"`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::ParseNameError;

/// Maximum allowed task and subtask title length in characters.
pub const MAX_TASK_TITLE_LENGTH: usize = 256;

/// Server-assigned task identifier. Immutable once issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(i64);

impl TaskId {
    /// Wraps a raw server id.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw server id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Identifier of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Wraps a raw server id.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw server id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Client-generated subtask identifier, unique within its parent task.
///
/// New ids are UUID v7 strings. Ids written by older clients are numbers
/// and are read back as their decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SubtaskId(String);

impl SubtaskId {
    /// Generates a fresh time-ordered subtask id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wraps an existing id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for SubtaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        crate::string_or_number(deserializer).map(Self)
    }
}

impl fmt::Display for SubtaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a task.
///
/// `Completed` and `Canceled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Assigned but not started.
    #[serde(rename = "To-Do")]
    ToDo,
    /// The receiver is working on it.
    #[serde(rename = "In Progress", alias = "In-Progress")]
    InProgress,
    /// Done. Terminal.
    #[serde(rename = "Completed")]
    Completed,
    /// Withdrawn by the sender. Terminal.
    #[serde(rename = "Canceled", alias = "Cancelled")]
    Canceled,
}

impl TaskStatus {
    /// Every task status, in display order.
    pub const ALL: [Self; 4] = [Self::ToDo, Self::InProgress, Self::Completed, Self::Canceled];

    /// Returns the server's spelling of this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToDo => "To-Do",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
            Self::Canceled => "Canceled",
        }
    }

    /// Whether no further status change is accepted from this status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "to-do" | "todo" => Ok(Self::ToDo),
            "in progress" | "in-progress" | "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            _ => Err(ParseNameError::new("task status", s)),
        }
    }
}

/// Status of a subtask. Subtasks cycle and are never canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SubtaskStatus {
    /// Not started.
    #[default]
    #[serde(rename = "To-Do")]
    ToDo,
    /// Being worked on.
    #[serde(rename = "In Progress", alias = "In-Progress")]
    InProgress,
    /// Done.
    #[serde(rename = "Completed")]
    Completed,
}

impl SubtaskStatus {
    /// Returns the server's spelling of this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToDo => "To-Do",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
        }
    }
}

impl fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A checklist item owned by its parent [`Task`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    /// Unique within the parent's subtask list.
    #[serde(alias = "_id")]
    pub id: SubtaskId,
    /// Display title. Not edited after creation.
    pub title: String,
    /// Current status.
    #[serde(default)]
    pub status: SubtaskStatus,
}

impl Subtask {
    /// Creates a new To-Do subtask with a freshly generated id.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: SubtaskId::generate(),
            title: title.into(),
            status: SubtaskStatus::ToDo,
        }
    }
}

/// Authoritative task snapshot as returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Server-assigned id.
    pub id: TaskId,
    /// Who assigned the task.
    pub sender_id: UserId,
    /// Who the task is assigned to.
    pub receiver_id: UserId,
    /// Display name of the sender, when the server joins it in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Display name of the receiver, when the server joins it in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_name: Option<String>,
    /// Title, fixed at creation.
    pub title: String,
    /// Description, fixed at creation.
    #[serde(default)]
    pub description: String,
    /// Current status.
    pub status: TaskStatus,
    /// Ordered checklist. The server may send it as a JSON-encoded string.
    #[serde(default, deserialize_with = "deserialize_subtasks")]
    pub subtasks: Vec<Subtask>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Optional deadline.
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    /// Set if and only if `status` is [`TaskStatus::Completed`].
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Sets the status and keeps `completed_at` consistent with it.
    ///
    /// Entering `Completed` stamps `completed_at` with `now` unless it was
    /// already stamped. Any other status clears it.
    pub fn set_status(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        self.status = status;
        self.completed_at = if status == TaskStatus::Completed {
            Some(self.completed_at.unwrap_or(now))
        } else {
            None
        };
    }

    /// Whether the task is in a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Looks up a subtask by id.
    #[must_use]
    pub fn subtask(&self, id: &SubtaskId) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| &s.id == id)
    }

    /// Whether `user` is the sender or the receiver.
    #[must_use]
    pub fn involves(&self, user: UserId) -> bool {
        self.sender_id == user || self.receiver_id == user
    }
}

/// Accepts a subtask list as a JSON array, a JSON-encoded string, or null.
fn deserialize_subtasks<'de, D>(deserializer: D) -> Result<Vec<Subtask>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<Subtask>),
        Encoded(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(Raw::List(list)) => Ok(list),
        Some(Raw::Encoded(text)) if text.trim().is_empty() => Ok(Vec::new()),
        Some(Raw::Encoded(text)) => serde_json::from_str(&text).map_err(serde::de::Error::custom),
    }
}

/// Partial update body for `PUT /tasks/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    /// New status, if changing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    /// Replacement subtask list, if changing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtasks: Option<Vec<Subtask>>,
}

/// Creation body for `POST /tasks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    /// Who the task is for.
    pub receiver_id: UserId,
    /// Title.
    pub title: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Optional deadline (calendar date).
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    /// Initial checklist.
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
}

/// Which slice of the task collection to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskFilter {
    /// Tasks assigned to the current user.
    Received,
    /// Tasks the current user assigned.
    Sent,
    /// Every task (administrative view).
    All,
}

impl TaskFilter {
    /// Value of the `type` query parameter.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Sent => "sent",
            Self::All => "all",
        }
    }
}

impl FromStr for TaskFilter {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "received" => Ok(Self::Received),
            "sent" => Ok(Self::Sent),
            "all" => Ok(Self::All),
            _ => Err(ParseNameError::new("task filter", s)),
        }
    }
}

/// Body for the privileged `POST /tasks/delete-all` purge. The server
/// re-validates these credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteAllRequest {
    /// Account name, re-entered by the operator.
    pub username: String,
    /// Account password, re-entered by the operator.
    pub password: String,
}
