//! Gateway trait and implementations.
//!
//! This module defines the `Gateway` trait, the one seam between the local
//! mirror and the remote hosting service. It's a request/response contract:
//! every call either returns the resource as the remote side now sees it,
//! or a typed [`ErrorKind`](crate::error::ErrorKind).

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalGateway;
#[cfg(feature = "mock")]
pub use self::mock::MockGateway;
use crate::error::Result;
use crate::models::{BuildStatus, DirEntry, RemoteFile, RemoteRepository, SearchQuery, WriteRequest};
use async_trait::async_trait;

/// Unified interface to a remote document host.
///
/// # Contract
/// - Authentication happens out of band; implementations are constructed
///   already authorized.
/// - Non-success responses are translated into typed errors. In particular a
///   stale or missing version token on a write surfaces as
///   [`PreconditionFailed`](crate::error::ErrorKind::PreconditionFailed) and
///   must never be retried silently.
/// - Listing a directory that doesn't exist yields an empty listing.
/// - No retries. Retrying is always the caller's decision.
///
/// # Examples
///
/// ```
/// use docmirror_gateway::{Gateway, error::Result};
///
/// async fn current_sha(gateway: &dyn Gateway, url: &str) -> Result<String> {
///     Ok(gateway.fetch_file(url).await?.sha)
/// }
/// ```
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Name of the gateway (for logging only).
    fn name(&self) -> &str;

    /// Fetch a file by its content URL.
    async fn fetch_file(&self, url: &str) -> Result<RemoteFile>;

    /// Fetch repository metadata by repository URL.
    async fn fetch_repository(&self, url: &str) -> Result<RemoteRepository>;

    /// List the direct children of `directory` in a repository.
    async fn list_directory(&self, repository_url: &str, directory: &str) -> Result<Vec<DirEntry>>;

    /// Find repositories matching a query.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<RemoteRepository>>;

    /// Create a new repository named `name` from the template repository at
    /// `template_url`, owned by the authenticated user.
    async fn create_from_template(&self, name: &str, template_url: &str) -> Result<RemoteRepository>;

    /// Create or update a single file, returning the file as now stored.
    async fn write_file(&self, request: WriteRequest) -> Result<RemoteFile>;

    /// Delete a file. `sha` must be the file's current version token.
    async fn delete_file(&self, url: &str, sha: &str, message: &str) -> Result<()>;

    async fn topics(&self, repository_url: &str) -> Result<Vec<String>>;

    /// Replace a repository's topic tags, returning the tags now set.
    async fn set_topics(&self, repository_url: &str, topics: &[String]) -> Result<Vec<String>>;

    async fn build_status(&self, repository_url: &str) -> Result<BuildStatus>;

    /// Copy the file at `from` to the (new) location `to`.
    ///
    /// With `return_existing`, a file already present at `to` is returned
    /// untouched instead of being overwritten, which makes repeated copies
    /// idempotent. Without it, an occupied target is overwritten.
    ///
    /// Default implementation is a fetch followed by a write.
    async fn copy_file(&self, from: &str, to: &str, return_existing: bool, message: &str) -> Result<RemoteFile> {
        let existing = match self.fetch_file(to).await {
            Ok(file) => Some(file),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        match existing {
            Some(file) if return_existing => Ok(file),
            existing => {
                let source = self.fetch_file(from).await?;
                let path = crate::url::parse_contents_path(to).unwrap_or_else(|| source.path.clone());
                self.write_file(WriteRequest {
                    url: to.to_string(),
                    path,
                    content: source.content,
                    sha: existing.map(|file| file.sha),
                    message: message.to_string(),
                })
                .await
            },
        }
    }
}
