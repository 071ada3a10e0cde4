//! In-memory gateway for testing.

use crate::backend::Gateway;
use crate::error::{ErrorKind, Result};
use crate::models::{BuildStatus, DirEntry, EntryKind, Owner, RemoteFile, RemoteRepository, SearchQuery, WriteRequest};
use crate::url;
use async_trait::async_trait;
use docmirror_codec::encoding;
use exn::ResultExt;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tokio::sync::RwLock;

const API_BASE: &str = "https://api.github.com/repos";

#[derive(Default)]
struct MockState {
    repositories: BTreeMap<String, (RemoteRepository, BuildStatus)>,
    files: BTreeMap<String, Vec<u8>>,
    failing: HashSet<String>,
    calls: Vec<(&'static str, String)>,
}

/// In-memory gateway for testing.
///
/// Every call yields to the scheduler before doing any work, so concurrent
/// callers interleave the way they would against a real remote. Calls are
/// logged, and any URL can be made to fail with [`fail`](Self::fail).
///
/// # Examples
///
/// ```
/// use docmirror_gateway::{Gateway, backend::MockGateway};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let gateway = MockGateway::default()
///     .with_repository("owner", "lesson", ["open-data"])
///     .with_file("owner/lesson", "_episodes/01.md", "---\ntitle: A\n---\nBody");
/// let file = gateway.fetch_file(&gateway.file_url("owner/lesson", "_episodes/01.md")).await?;
/// assert_eq!(file.path, "_episodes/01.md");
/// # Ok(())
/// # }
/// ```
pub struct MockGateway {
    name: String,
    login: String,
    state: RwLock<MockState>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            login: "me".to_string(),
            state: RwLock::new(MockState::default()),
        }
    }
}

impl MockGateway {
    pub fn api_base(&self) -> &str {
        API_BASE
    }

    pub fn repository_url(&self, full_name: &str) -> String {
        url::repository_url(API_BASE, full_name)
    }

    pub fn file_url(&self, full_name: &str, path: &str) -> String {
        url::contents_url(&self.repository_url(full_name), path)
    }

    /// Add a repository.
    pub fn with_repository<T: Into<String>>(
        mut self,
        owner: &str,
        name: &str,
        topics: impl IntoIterator<Item = T>,
    ) -> Self {
        let repository = RemoteRepository {
            url: self.repository_url(&format!("{owner}/{name}")),
            name: name.to_string(),
            owner: Owner {
                login: owner.to_string(),
            },
            topics: topics.into_iter().map(Into::into).collect(),
            description: None,
            is_template: false,
        };
        self.state.get_mut().repositories.insert(repository.url.clone(), (repository, BuildStatus::Unknown));
        self
    }

    /// Add a file to an existing repository (`owner/name`).
    ///
    /// Panics if the repository hasn't been added. If test setup is wrong,
    /// then test should not pass.
    pub fn with_file(mut self, full_name: &str, path: &str, content: impl Into<Vec<u8>>) -> Self {
        let repository_url = self.repository_url(full_name);
        assert!(
            self.state.get_mut().repositories.contains_key(&repository_url),
            "MockGateway::with_file: unknown repository {full_name}"
        );
        let file_url = self.file_url(full_name, path);
        self.state.get_mut().files.insert(file_url, content.into());
        self
    }

    /// Make every call touching `url` fail with a network error.
    pub async fn fail(&self, url: impl Into<String>) {
        self.state.write().await.failing.insert(url.into());
    }

    pub async fn recover(&self, url: &str) {
        self.state.write().await.failing.remove(url);
    }

    /// Number of calls made to `operation` (e.g. `"write_file"`) for `url`.
    pub async fn calls(&self, operation: &str, url: &str) -> usize {
        self.state.read().await.calls.iter().filter(|(op, u)| *op == operation && u == url).count()
    }

    /// Total number of calls made to `operation`.
    pub async fn total_calls(&self, operation: &str) -> usize {
        self.state.read().await.calls.iter().filter(|(op, _)| *op == operation).count()
    }

    /// Decoded content stored at `url`, if any.
    pub async fn content(&self, url: &str) -> Option<String> {
        let state = self.state.read().await;
        state.files.get(url).map(|data| String::from_utf8_lossy(data).into_owned())
    }

    pub async fn exists(&self, url: &str) -> bool {
        self.state.read().await.files.contains_key(url)
    }

    pub async fn set_build_status(&self, repository_url: &str, status: BuildStatus) {
        if let Some(entry) = self.state.write().await.repositories.get_mut(repository_url) {
            entry.1 = status;
        }
    }

    fn sha(data: &[u8]) -> String {
        blake3::hash(data).to_hex().to_string()
    }

    /// Yield, log the call, then fail if the URL has been marked as failing.
    async fn enter(&self, operation: &'static str, url: &str) -> Result<()> {
        tokio::task::yield_now().await;
        let url = url::strip_ref(url).to_string();
        let mut state = self.state.write().await;
        state.calls.push((operation, url.clone()));
        if state.failing.contains(&url) {
            exn::bail!(ErrorKind::Network(format!("{operation} {url}")));
        }
        Ok(())
    }

    fn remote_file(url: &str, data: &[u8]) -> Result<RemoteFile> {
        let Some(path) = url::parse_contents_path(url) else {
            exn::bail!(ErrorKind::InvalidUrl(url.to_string()));
        };
        Ok(RemoteFile {
            url: url.to_string(),
            path,
            sha: Self::sha(data),
            content: encoding::encode_bytes(data),
        })
    }

    fn owning_repository(state: &MockState, file_url: &str) -> Result<()> {
        match state.repositories.keys().any(|repo| url::is_member(file_url, repo)) {
            true => Ok(()),
            false => exn::bail!(ErrorKind::NotFound(file_url.to_string())),
        }
    }
}

#[async_trait]
impl Gateway for MockGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_file(&self, url: &str) -> Result<RemoteFile> {
        self.enter("fetch_file", url).await?;
        let url = url::strip_ref(url);
        let state = self.state.read().await;
        let data = state.files.get(url).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(url.to_string())))?;
        Self::remote_file(url, data)
    }

    async fn fetch_repository(&self, url: &str) -> Result<RemoteRepository> {
        self.enter("fetch_repository", url).await?;
        let state = self.state.read().await;
        state
            .repositories
            .get(url::strip_ref(url))
            .map(|(repository, _)| repository.clone())
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(url.to_string())))
    }

    async fn list_directory(&self, repository_url: &str, directory: &str) -> Result<Vec<DirEntry>> {
        self.enter("list_directory", repository_url).await?;
        let directory = directory.trim_matches('/');
        let prefix = match directory {
            "" => url::contents_url(repository_url, ""),
            dir => format!("{}/", url::contents_url(repository_url, dir)),
        };
        let state = self.state.read().await;
        let mut seen = BTreeSet::new();
        let mut listing = Vec::new();
        for file_url in state.files.keys() {
            let Some(rest) = file_url.strip_prefix(&prefix) else {
                continue;
            };
            let (name, kind) = match rest.split_once('/') {
                Some((dir, _)) => (dir, EntryKind::Dir),
                None => (rest, EntryKind::File),
            };
            if !seen.insert(name.to_string()) {
                continue;
            }
            let path = match directory {
                "" => name.to_string(),
                dir => format!("{dir}/{name}"),
            };
            listing.push(DirEntry {
                url: url::contents_url(repository_url, &path),
                name: name.to_string(),
                path,
                kind,
            });
        }
        Ok(listing)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<RemoteRepository>> {
        self.enter("search", "").await?;
        let state = self.state.read().await;
        Ok(state.repositories.values().map(|(r, _)| r).filter(|r| query.matches(r)).cloned().collect())
    }

    async fn create_from_template(&self, name: &str, template_url: &str) -> Result<RemoteRepository> {
        self.enter("create_from_template", template_url).await?;
        let new_url = self.repository_url(&format!("{}/{name}", self.login));
        let mut state = self.state.write().await;
        let Some((template, _)) = state.repositories.get(url::strip_ref(template_url)).cloned() else {
            exn::bail!(ErrorKind::NotFound(template_url.to_string()));
        };
        if state.repositories.contains_key(&new_url) {
            exn::bail!(ErrorKind::AlreadyExists(new_url));
        }
        let copies: Vec<(String, Vec<u8>)> = state
            .files
            .iter()
            .filter(|(file_url, _)| url::is_member(file_url, &template.url))
            .filter_map(|(file_url, data)| {
                url::parse_contents_path(file_url).map(|path| (url::contents_url(&new_url, &path), data.clone()))
            })
            .collect();
        state.files.extend(copies);
        let repository = RemoteRepository {
            url: new_url.clone(),
            name: name.to_string(),
            owner: Owner {
                login: self.login.clone(),
            },
            topics: Vec::new(),
            description: template.description,
            is_template: false,
        };
        state.repositories.insert(new_url, (repository.clone(), BuildStatus::Unknown));
        Ok(repository)
    }

    async fn write_file(&self, request: WriteRequest) -> Result<RemoteFile> {
        self.enter("write_file", &request.url).await?;
        let url = url::strip_ref(&request.url).to_string();
        let data = encoding::decode_bytes(&request.content)
            .or_raise(|| ErrorKind::Backend(format!("unreadable content for `{url}`")))?;
        let mut state = self.state.write().await;
        Self::owning_repository(&state, &url)?;
        let current = state.files.get(&url).map(|existing| Self::sha(existing));
        match (current.as_deref(), request.sha.as_deref()) {
            (None, None) => {},
            (Some(current), Some(given)) if current == given => {},
            _ => exn::bail!(ErrorKind::PreconditionFailed(url)),
        }
        let file = Self::remote_file(&url, &data)?;
        state.files.insert(url, data);
        Ok(file)
    }

    async fn delete_file(&self, url: &str, sha: &str, _message: &str) -> Result<()> {
        self.enter("delete_file", url).await?;
        let url = url::strip_ref(url);
        let mut state = self.state.write().await;
        match state.files.get(url).map(|data| Self::sha(data)) {
            None => exn::bail!(ErrorKind::NotFound(url.to_string())),
            Some(current) if current != sha => exn::bail!(ErrorKind::PreconditionFailed(url.to_string())),
            Some(_) => {},
        }
        state.files.remove(url);
        Ok(())
    }

    async fn topics(&self, repository_url: &str) -> Result<Vec<String>> {
        Ok(self.fetch_repository(repository_url).await?.topics)
    }

    async fn set_topics(&self, repository_url: &str, topics: &[String]) -> Result<Vec<String>> {
        self.enter("set_topics", repository_url).await?;
        let mut state = self.state.write().await;
        let (repository, _) = state
            .repositories
            .get_mut(url::strip_ref(repository_url))
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(repository_url.to_string())))?;
        repository.topics = topics.to_vec();
        Ok(repository.topics.clone())
    }

    async fn build_status(&self, repository_url: &str) -> Result<BuildStatus> {
        self.enter("build_status", repository_url).await?;
        let state = self.state.read().await;
        state
            .repositories
            .get(url::strip_ref(repository_url))
            .map(|(_, status)| status.clone())
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(repository_url.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> MockGateway {
        MockGateway::default()
            .with_repository("owner", "lesson", ["open-data"])
            .with_file("owner/lesson", "_episodes/01.md", "one")
            .with_file("owner/lesson", "_episodes/fig/a.png", "png")
            .with_file("owner/lesson", "_config.yml", "title: T")
    }

    #[tokio::test]
    async fn test_fetch_and_write() {
        let gateway = gateway();
        let url = gateway.file_url("owner/lesson", "_episodes/01.md");
        let file = gateway.fetch_file(&url).await.unwrap();
        assert_eq!(encoding::decode(&file.content).unwrap(), "one");
        let written = gateway
            .write_file(WriteRequest {
                url: url.clone(),
                path: file.path.clone(),
                content: encoding::encode("two"),
                sha: Some(file.sha.clone()),
                message: "update".to_string(),
            })
            .await
            .unwrap();
        assert_ne!(written.sha, file.sha);
        assert_eq!(gateway.content(&url).await.as_deref(), Some("two"));
        assert_eq!(gateway.calls("write_file", &url).await, 1);
    }

    #[tokio::test]
    async fn test_stale_sha_is_rejected() {
        let gateway = gateway();
        let url = gateway.file_url("owner/lesson", "_config.yml");
        let err = gateway
            .write_file(WriteRequest {
                url: url.clone(),
                path: "_config.yml".to_string(),
                content: encoding::encode("title: X"),
                sha: Some("stale".to_string()),
                message: "update".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::PreconditionFailed(_)));
        let err = gateway.delete_file(&url, "stale", "rm").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let gateway = gateway();
        let url = gateway.file_url("owner/lesson", "_config.yml");
        gateway.fail(url.clone()).await;
        let err = gateway.fetch_file(&url).await.unwrap_err();
        assert!(err.is_retryable());
        gateway.recover(&url).await;
        assert!(gateway.fetch_file(&url).await.is_ok());
        assert_eq!(gateway.calls("fetch_file", &url).await, 2);
    }

    #[tokio::test]
    async fn test_list_directory() {
        let gateway = gateway();
        let repo = gateway.repository_url("owner/lesson");
        let listing = gateway.list_directory(&repo, "_episodes").await.unwrap();
        let names: Vec<_> = listing.iter().map(|e| (e.name.as_str(), e.kind)).collect();
        assert_eq!(names, vec![("01.md", EntryKind::File), ("fig", EntryKind::Dir)]);
        assert!(gateway.list_directory(&repo, "_episodes_rmd").await.unwrap().is_empty());
        let root = gateway.list_directory(&repo, "").await.unwrap();
        assert_eq!(root.len(), 2);
    }

    #[tokio::test]
    async fn test_create_from_template() {
        let gateway = gateway();
        let template = gateway.repository_url("owner/lesson");
        let created = gateway.create_from_template("new", &template).await.unwrap();
        assert_eq!(created.url, gateway.repository_url("me/new"));
        assert!(gateway.exists(&gateway.file_url("me/new", "_config.yml")).await);
        let err = gateway.create_from_template("new", &template).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
    }
}
