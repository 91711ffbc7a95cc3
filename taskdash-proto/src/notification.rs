//! Notification wire types.
//!
//! The server emits a notification whenever something happens to a task the
//! user is part of. The only client-side change is flipping `is_read` from
//! `false` to `true`, which never reverts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Server-assigned notification identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
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

impl<'de> Deserialize<'de> for NotificationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        crate::string_or_number(deserializer).map(Self)
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single notification addressed to the current user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Server id (`_id` on the wire, `id` also accepted).
    #[serde(rename = "_id", alias = "id")]
    pub id: NotificationId,
    /// Display text.
    pub message: String,
    /// Read flag. Monotonic: only ever goes from `false` to `true`.
    #[serde(rename = "isRead", alias = "is_read", default)]
    pub is_read: bool,
    /// When the server created it.
    #[serde(rename = "createdAt", alias = "created_at")]
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Marks the notification read. Returns `true` if it was unread.
    pub const fn mark_read(&mut self) -> bool {
        let was_unread = !self.is_read;
        self.is_read = true;
        was_unread
    }
}
