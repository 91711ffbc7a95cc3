//! `TaskDash`: task-assignment dashboard client library.
//!
//! The core keeps tasks and notifications in sync with the server, applying
//! the user's own changes optimistically and rolling them back when the
//! server refuses them.

pub mod api;
pub mod config;
pub mod dashboard;
pub mod events;
pub mod notifications;
pub mod poll;
pub mod tasks;
pub mod transport;
