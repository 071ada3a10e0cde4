//! Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Only programmer errors travel through [`Result`]: unknown URLs, invalid
//! payloads, operations that make no sense for the given file. A failed
//! remote call is not an error at this level; it's recorded in the store's
//! error log and the operation returns `Ok(None)`.

use derive_more::{Display, Error};

/// A store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("unknown file: {_0}")]
    UnknownFile(#[error(not(source))] String),
    #[display("unknown repository: {_0}")]
    UnknownRepository(#[error(not(source))] String),
    #[display("cannot have multiple main repositories")]
    MultipleMainRepositories,
    /// Adding a file that's already present without asking to overwrite it.
    #[display("attempt to overwrite existing file: {_0}")]
    FileExists(#[error(not(source))] String),
    #[display("content must be valid base64-encoded text")]
    InvalidEncoding,
    #[display("no main repository has been set")]
    NoMainRepository,
    #[display("cannot install a file into its own repository: {_0}")]
    SelfInstall(#[error(not(source))] String),
    #[display("url does not have the expected remote shape: {_0}")]
    InvalidRemoteUrl(#[error(not(source))] String),
    #[display("only files in the main repository can be deleted: {_0}")]
    NotInMainRepository(#[error(not(source))] String),
    /// Dependencies are outstanding but the file doesn't say where it came from.
    #[display("file has no original repository to install from: {_0}")]
    NotInstalled(#[error(not(source))] String),
    #[display("cannot set unknown topics: {}", _0.join(", "))]
    UnknownTopics(#[error(not(source))] Vec<String>),
    #[display("missing required argument: {_0}")]
    MissingArgument(#[error(not(source))] &'static str),
    #[display("unable to serialize file content")]
    Codec,
    /// A read-only passthrough to the gateway failed.
    #[display("gateway request failed")]
    Gateway,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// Only [`Gateway`](Self::Gateway) is; everything else describes a caller mistake.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Gateway)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ErrorKind::MultipleMainRepositories.to_string(), "cannot have multiple main repositories");
        assert_eq!(
            ErrorKind::UnknownTopics(vec!["a".to_string(), "b".to_string()]).to_string(),
            "cannot set unknown topics: a, b"
        );
    }
}
