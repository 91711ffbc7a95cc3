//! Shared data model and JSON wire types for `TaskDash`.
//!
//! Everything here mirrors what the task server sends and accepts. The
//! client core in the `taskdash` crate builds its optimistic state on top
//! of these types without adding fields of its own.

pub mod notification;
pub mod task;
pub mod user;

use thiserror::Error;

/// Error returned when parsing a wire name (status, filter) from text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseNameError {
    /// What was being parsed (e.g. "task status").
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

impl ParseNameError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Deserializes an identifier that the server may send as a string or a
/// number (older rows use time-derived numeric ids).
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match <Raw as serde::Deserialize>::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Float(f) => f.to_string(),
    })
}
