//! Codec Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A codec error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input is not valid base64. Don't retry with the same input.
    #[display("content is not valid base64")]
    InvalidEncoding,
    /// Decoded bytes are not UTF-8 text.
    #[display("content is not valid UTF-8")]
    InvalidText,
    /// Front matter could not be serialized back to YAML.
    #[display("unable to serialize front matter: {_0}")]
    Serialize(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
