//! Typed remote operations against the task server.
//!
//! [`TaskApi`] turns the untyped [`Transport`] calls into the handful of
//! operations the client core needs, decoding responses into proto types.

use serde::de::DeserializeOwned;
use serde_json::Value;
use taskdash_proto::notification::{Notification, NotificationId};
use taskdash_proto::task::{DeleteAllRequest, NewTask, Task, TaskFilter, TaskId, TaskPatch, UserId};
use taskdash_proto::user::User;

use crate::transport::{Transport, TransportError};

/// Typed client for the task server's REST API.
pub struct TaskApi<T: Transport> {
    transport: T,
}

impl<T: Transport> TaskApi<T> {
    /// Wraps a transport.
    pub const fn new(transport: T) -> Self {
        Self { transport }
    }

    /// The user this client acts as.
    pub fn user_id(&self) -> UserId {
        self.transport.session().user_id
    }

    /// The underlying transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Lists users a task can be assigned to.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the request fails or the body is malformed.
    pub async fn fetch_users(&self) -> Result<Vec<User>, TransportError> {
        decode(self.transport.get("/users").await?)
    }

    /// Removes a user account. Tasks that involve the user stay on the
    /// server.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the request fails or the server refuses.
    pub async fn delete_user(&self, id: UserId) -> Result<(), TransportError> {
        self.transport.delete(&format!("/users/{id}")).await?;
        Ok(())
    }

    /// Lists tasks in the given slice of the collection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the request fails or the body is malformed.
    pub async fn fetch_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>, TransportError> {
        let path = format!("/tasks?type={}", filter.as_str());
        decode(self.transport.get(&path).await?)
    }

    /// Creates a task and returns the server's copy.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the request fails or the body is malformed.
    pub async fn create_task(&self, task: &NewTask) -> Result<Task, TransportError> {
        let body = serde_json::to_value(task)?;
        decode(self.transport.post("/tasks", body).await?)
    }

    /// Applies a partial update to a task.
    ///
    /// The response body is not inspected: the caller already holds the
    /// state it asked for, and the next poll brings the server's copy.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the request fails.
    pub async fn update_task(&self, id: TaskId, patch: &TaskPatch) -> Result<(), TransportError> {
        let body = serde_json::to_value(patch)?;
        self.transport.put(&format!("/tasks/{id}"), body).await?;
        Ok(())
    }

    /// Deletes every task. The server re-validates the given credentials.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the request fails or the credentials
    /// are rejected.
    pub async fn delete_all_tasks(&self, request: &DeleteAllRequest) -> Result<(), TransportError> {
        let body = serde_json::to_value(request)?;
        self.transport.post("/tasks/delete-all", body).await?;
        Ok(())
    }

    /// Lists the current user's notifications.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the request fails or the body is malformed.
    pub async fn fetch_notifications(&self) -> Result<Vec<Notification>, TransportError> {
        decode(self.transport.get("/notifications").await?)
    }

    /// Marks one notification read.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the request fails.
    pub async fn mark_notification_read(&self, id: &NotificationId) -> Result<(), TransportError> {
        self.transport
            .put(&format!("/notifications/{id}/read"), Value::Null)
            .await?;
        Ok(())
    }

    /// Marks every notification read.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the request fails.
    pub async fn mark_all_notifications_read(&self) -> Result<(), TransportError> {
        self.transport
            .put("/notifications/mark-all-read", Value::Null)
            .await?;
        Ok(())
    }
}

fn decode<D: DeserializeOwned>(value: Value) -> Result<D, TransportError> {
    Ok(serde_json::from_value(value)?)
}
