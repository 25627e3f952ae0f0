//! The result of processing one time group.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Message used when a failure carries no text of its own.
pub const UNEXPECTED_ERROR_MESSAGE: &str = "Unexpected error";

/// Outcome of handing a time group to the integration.
///
/// Outcomes are values, not errors: a failure here is a business result that
/// gets persisted and reported back to the remote source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "message", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// The time group was recorded by the integration.
    Success,

    /// The integration could not record the group right now; it may succeed
    /// if delivered again later.
    TransientFailure(String),

    /// The group can never be recorded as-is.
    PermanentFailure(String),
}

impl Outcome {
    pub fn transient(message: impl Into<String>) -> Self {
        Outcome::TransientFailure(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Outcome::PermanentFailure(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// The failure text, empty for success.
    pub fn message(&self) -> &str {
        match self {
            Outcome::Success => "",
            Outcome::TransientFailure(m) | Outcome::PermanentFailure(m) => m,
        }
    }

    /// The text to show a caller: `"Success"`, or the failure message with a
    /// generic fallback when it is blank.
    pub fn display_message(&self) -> &str {
        match self {
            Outcome::Success => "Success",
            _ if self.message().trim().is_empty() => UNEXPECTED_ERROR_MESSAGE,
            _ => self.message(),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::TransientFailure(m) => write!(f, "transient failure: {}", m),
            Outcome::PermanentFailure(m) => write!(f, "permanent failure: {}", m),
        }
    }
}
