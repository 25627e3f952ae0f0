//! Remote API error types.
//!
//! Errors are classified by kind because callers react differently:
//!
//! - **Timeout** - the request (typically a long poll) ran out of time with
//!   nothing wrong on either side. Reconnect almost immediately.
//! - **Unavailable** - the remote could not be reached or answered 429/5xx.
//!   Back off before trying again.
//! - **Rejected** - the remote refused the request (other 4xx). Retrying the
//!   same request will not help until something changes.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// The kind of remote API error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    Timeout,
    Unavailable,
    Rejected,
}

impl RemoteErrorKind {
    /// Returns true if the same request may succeed later.
    pub fn is_retriable(&self) -> bool {
        matches!(self, RemoteErrorKind::Timeout | RemoteErrorKind::Unavailable)
    }
}

/// A remote API error with its classification.
#[derive(Debug, Error)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,

    /// The HTTP status code, if the remote answered.
    pub status_code: Option<u16>,

    pub message: String,

    #[source]
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "remote API error (HTTP {}): {}", code, self.message),
            None => write!(f, "remote API error: {}", self.message),
        }
    }
}

impl RemoteError {
    fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        RemoteError {
            kind,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Timeout, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unavailable, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Rejected, message)
    }

    /// Classifies an HTTP error response.
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let kind = match status_code {
            408 | 504 => RemoteErrorKind::Timeout,
            429 => RemoteErrorKind::Unavailable,
            code if (500..600).contains(&code) => RemoteErrorKind::Unavailable,
            _ => RemoteErrorKind::Rejected,
        };
        RemoteError {
            status_code: Some(status_code),
            ..Self::new(kind, message)
        }
    }

    /// Attaches the underlying transport error.
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == RemoteErrorKind::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_classified() {
        assert_eq!(RemoteError::from_status(504, "x").kind, RemoteErrorKind::Timeout);
        assert_eq!(RemoteError::from_status(408, "x").kind, RemoteErrorKind::Timeout);
        assert_eq!(RemoteError::from_status(429, "x").kind, RemoteErrorKind::Unavailable);
        assert_eq!(RemoteError::from_status(503, "x").kind, RemoteErrorKind::Unavailable);
        assert_eq!(RemoteError::from_status(401, "x").kind, RemoteErrorKind::Rejected);
    }

    #[test]
    fn display_includes_status_code() {
        assert_eq!(
            RemoteError::from_status(502, "bad gateway").to_string(),
            "remote API error (HTTP 502): bad gateway"
        );
        assert_eq!(
            RemoteError::timeout("long poll expired").to_string(),
            "remote API error: long poll expired"
        );
    }

    #[test]
    fn source_is_exposed() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = RemoteError::unavailable("connection lost").with_source(io);
        assert!(err.source().is_some());
    }

    #[test]
    fn only_rejections_are_not_retriable() {
        assert!(RemoteErrorKind::Timeout.is_retriable());
        assert!(RemoteErrorKind::Unavailable.is_retriable());
        assert!(!RemoteErrorKind::Rejected.is_retriable());
    }
}
