//! Notification inbox kept in sync by polling.
//!
//! Reads are applied locally first and then sent to the server. A failed
//! write is reported but not rolled back: once the user has seen a
//! notification as read it stays read.

pub mod tracker;

pub use tracker::{NotificationPoll, NotificationTracker};

use taskdash_proto::notification::NotificationId;
use thiserror::Error;

use crate::transport::TransportError;

/// Errors from notification operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotificationError {
    /// The inbox holds no notification with this id.
    #[error("notification not found: {0}")]
    NotFound(NotificationId),
    /// The server call failed. The local read state was kept.
    #[error("request failed: {0}")]
    TransportFailure(String),
}

impl From<TransportError> for NotificationError {
    fn from(err: TransportError) -> Self {
        Self::TransportFailure(err.to_string())
    }
}
