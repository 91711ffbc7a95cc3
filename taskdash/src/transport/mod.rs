//! Transport layer abstraction for `TaskDash`.
//!
//! Defines the [`Transport`] trait the client core talks to the task server
//! through. Concrete implementations:
//! - [`http::HttpTransport`] for JSON over HTTP via `reqwest`
//! - [`memory::MemoryTransport`], an in-process backend for tests and offline mode

pub mod http;
pub mod memory;

use std::fmt;

use serde_json::Value;
use taskdash_proto::task::UserId;

/// The authenticated session a transport acts for.
///
/// Passed to a transport at construction; there is no process-wide auth
/// state to mutate.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// The signed-in user.
    pub user_id: UserId,
    /// Bearer token attached to every request.
    pub token: String,
}

impl Session {
    /// Creates a session for `user_id` authenticated by `token`.
    pub fn new(user_id: UserId, token: impl Into<String>) -> Self {
        Self {
            user_id,
            token: token.into(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Server-provided error text, or the canonical reason.
        message: String,
    },

    /// The request never produced a response (connection refused, timeout, ...).
    #[error("network error: {0}")]
    Network(String),

    /// The response body did not match the expected shape.
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// The request path could not be turned into a URL.
    #[error("invalid request path {0:?}")]
    InvalidPath(String),
}

impl TransportError {
    /// HTTP status of the failure, if the server answered at all.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Async request/response transport to the task server.
///
/// Paths are relative to the server's API root (e.g. `/tasks?type=sent`).
/// Bodies and responses are JSON. Authentication is the implementation's
/// concern; callers never see the token.
pub trait Transport: Send + Sync {
    /// Issue a `GET` request.
    fn get(&self, path: &str)
    -> impl std::future::Future<Output = Result<Value, TransportError>> + Send;

    /// Issue a `POST` request with a JSON body.
    fn post(
        &self,
        path: &str,
        body: Value,
    ) -> impl std::future::Future<Output = Result<Value, TransportError>> + Send;

    /// Issue a `PUT` request with a JSON body.
    fn put(
        &self,
        path: &str,
        body: Value,
    ) -> impl std::future::Future<Output = Result<Value, TransportError>> + Send;

    /// Issue a `DELETE` request.
    fn delete(
        &self,
        path: &str,
    ) -> impl std::future::Future<Output = Result<Value, TransportError>> + Send;

    /// The session this transport authenticates as.
    fn session(&self) -> &Session;
}
