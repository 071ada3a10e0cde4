//! Gateway Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Every implementation of [`Gateway`](crate::Gateway) translates its own
//! failures (HTTP statuses, filesystem errors) into these kinds so the store
//! can react to them without knowing which gateway it's talking to.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A gateway error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Resource does not exist on the remote side.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The version token sent with a write or delete is stale or missing.
    /// Someone else changed the resource; re-pull before trying again.
    #[display("version precondition failed: {_0}")]
    PreconditionFailed(#[error(not(source))] String),
    /// Credentials missing or rejected.
    #[display("unauthorized: {_0}")]
    Unauthorized(#[error(not(source))] String),
    /// Transport-level failure.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// URL does not have the shape the gateway expects.
    #[display("invalid url: {_0}")]
    InvalidUrl(#[error(not(source))] String),
    /// The remote side answered with something unreadable.
    #[display("invalid response: {_0}")]
    InvalidResponse(#[error(not(source))] String),
    /// Resource already exists (for operations that require new resources).
    #[display("already exists: {_0}")]
    AlreadyExists(#[error(not(source))] String),
    /// Gateway-specific error
    #[display("gateway error: {_0}")]
    Backend(#[error(not(source))] String),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_) | Self::Backend(_))
    }

    /// Returns `true` for "this resource does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
