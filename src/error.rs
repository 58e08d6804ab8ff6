//! Error types for mailbox search.
//!
//! Failures fall into two classes. Service failures (a malformed target, an
//! account that cannot be resolved, corrupt stored metadata) abort the query
//! that detected them. I/O failures (a broken transport, a stream that fails
//! to close) are reported on iteration or `close`, but never stop sibling
//! resources from being released.
//!
//! Broken plans (binding a context twice, grouping conversations, preloading
//! a proxied hit) are not represented here: they panic.
//!
//! # Examples
//!
//! ```
//! use mailquery::error::{Result, SearchError};
//!
//! fn resolve(account: &str) -> Result<()> {
//!     Err(SearchError::unknown_account(account))
//! }
//!
//! let err = resolve("bob@example.com").unwrap_err();
//! assert!(!err.is_io());
//! ```

use std::io;

use thiserror::Error;

/// The error type for search operations.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Generic service-level failure.
    #[error("Service error: {0}")]
    Service(String),

    /// A query target could not be interpreted.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// A remote account could not be resolved to a server.
    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    /// Stored metadata could not be decoded.
    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors (file operations, closing streams)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport failure talking to another server.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type alias for operations that may fail with SearchError.
pub type Result<T> = std::result::Result<T, SearchError>;

impl SearchError {
    /// Create a new service error.
    pub fn service<S: Into<String>>(msg: S) -> Self {
        SearchError::Service(msg.into())
    }

    /// Create a new invalid target error.
    pub fn invalid_target<S: Into<String>>(msg: S) -> Self {
        SearchError::InvalidTarget(msg.into())
    }

    /// Create a new unknown account error.
    pub fn unknown_account<S: Into<String>>(account: S) -> Self {
        SearchError::UnknownAccount(account.into())
    }

    /// Create a new malformed metadata error.
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        SearchError::MalformedMetadata(msg.into())
    }

    /// Create a new transport error.
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        SearchError::Transport(msg.into())
    }

    /// Create a new invalid config error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        SearchError::Service(format!("Invalid configuration: {}", msg.into()))
    }

    /// Whether this error belongs to the I/O class.
    pub fn is_io(&self) -> bool {
        matches!(self, SearchError::Io(_) | SearchError::Transport(_))
    }
}

/// Keeps the first error out of a best-effort cleanup sequence.
///
/// Later errors are logged and dropped so that every resource still gets its
/// chance to close.
#[derive(Debug, Default)]
pub(crate) struct FirstError(Option<SearchError>);

impl FirstError {
    pub(crate) fn record(&mut self, result: Result<()>) {
        if let Err(e) = result {
            if self.0.is_none() {
                self.0 = Some(e);
            } else {
                log::warn!("Suppressed error during close: {e}");
            }
        }
    }

    pub(crate) fn into_result(self) -> Result<()> {
        match self.0 {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = SearchError::unknown_account("alice@example.com");
        assert_eq!(error.to_string(), "Unknown account: alice@example.com");

        let error = SearchError::invalid_target("");
        assert_eq!(error.to_string(), "Invalid target: ");
        assert!(!error.is_io());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let search_error = SearchError::from(io_error);

        match search_error {
            SearchError::Io(_) => {} // Expected
            _ => panic!("Expected IO error variant"),
        }
        assert!(SearchError::transport("reset").is_io());
    }

    #[test]
    fn test_first_error_keeps_first() {
        let mut first = FirstError::default();
        first.record(Ok(()));
        first.record(Err(SearchError::transport("a")));
        first.record(Err(SearchError::transport("b")));

        let err = first.into_result().unwrap_err();
        assert_eq!(err.to_string(), "Transport error: a");
    }
}
