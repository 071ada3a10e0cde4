//! Local filesystem gateway.
//!
//! Serves repositories from a directory tree laid out as
//! `<root>/<owner>/<name>/<path>`, so a mirror can be driven entirely
//! offline. Version tokens are content hashes, which gives writes and
//! deletes the same optimistic-concurrency behaviour as the remote host.

use crate::backend::Gateway;
use crate::error::{ErrorKind, Result};
use crate::models::{BuildStatus, DirEntry, EntryKind, Owner, RemoteFile, RemoteRepository, SearchQuery, WriteRequest};
use crate::path::validate as validate_path;
use crate::url::{self, ContentUrl};
use async_stream::stream;
use async_trait::async_trait;
use docmirror_codec::encoding;
use exn::ResultExt;
use futures::{Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Per-repository bookkeeping directory, hidden from listings and content URLs.
const META_DIR: &str = ".docmirror";
const META_FILE: &str = "repository.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct RepositoryMeta {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    is_template: bool,
    #[serde(default)]
    build_status: BuildStatus,
}

/// Local filesystem gateway.
///
/// # Examples
///
/// ```no_run
/// use docmirror_gateway::backend::LocalGateway;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let gateway = LocalGateway::new("local", "/srv/mirror", "https://api.github.com/repos", "me")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalGateway {
    name: String,
    root: PathBuf,
    api_base: String,
    /// Owner of repositories created from templates.
    login: String,
}

impl LocalGateway {
    /// Create a new local gateway rooted at the absolute directory `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute or is not a directory.
    pub fn new(
        name: impl Into<String>,
        root: impl AsRef<Path>,
        api_base: impl Into<String>,
        login: impl Into<String>,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidUrl(root.display().to_string()));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::Backend(format!("`{}` is not a directory", root.display())));
            }
        } else {
            // Only happens once at startup; not worth making the constructor async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root.display().to_string()))?;
        }
        Ok(Self {
            name: name.into(),
            root,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            login: login.into(),
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Register a (possibly empty) repository, creating its directory.
    pub async fn register(
        &self,
        owner: &str,
        name: &str,
        topics: &[String],
        is_template: bool,
    ) -> Result<RemoteRepository> {
        let dir = self.repository_dir(owner, name)?;
        fs::create_dir_all(&dir).await.map_err(|e| Self::map_io_error(e, name))?;
        let meta = RepositoryMeta {
            topics: topics.to_vec(),
            is_template,
            ..self.read_meta(&dir).await?
        };
        self.write_meta(&dir, &meta).await?;
        Ok(self.remote_repository(owner, name, meta))
    }

    fn map_io_error(e: std::io::Error, what: &str) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(what.to_string()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::Unauthorized(what.to_string()),
            std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists(what.to_string()),
            _ => ErrorKind::Io(e),
        }
    }

    fn repository_dir(&self, owner: &str, name: &str) -> Result<PathBuf> {
        let relative = validate_path(Path::new(owner).join(name))?;
        if relative.components().count() != 2 {
            exn::bail!(ErrorKind::InvalidUrl(format!("{owner}/{name}")));
        }
        Ok(self.root.join(relative))
    }

    /// Absolute location of a content URL, refusing the bookkeeping directory.
    fn file_location(&self, url: &str) -> Result<(ContentUrl, PathBuf)> {
        let parsed = url::parse_contents(&self.api_base, url)?;
        let relative = validate_path(&parsed.path)?;
        if relative.starts_with(META_DIR) {
            exn::bail!(ErrorKind::InvalidUrl(url.to_string()));
        }
        let dir = self.repository_dir(&parsed.owner, &parsed.name)?;
        Ok((parsed, dir.join(relative)))
    }

    fn sha(data: &[u8]) -> String {
        blake3::hash(data).to_hex().to_string()
    }

    async fn current_sha(location: &Path) -> Result<Option<String>> {
        match fs::read(location).await {
            Ok(data) => Ok(Some(Self::sha(&data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ErrorKind::Io(e).into()),
        }
    }

    async fn read_meta(&self, dir: &Path) -> Result<RepositoryMeta> {
        match fs::read(dir.join(META_DIR).join(META_FILE)).await {
            Ok(data) => serde_json::from_slice(&data)
                .or_raise(|| ErrorKind::InvalidResponse(format!("corrupt metadata in `{}`", dir.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RepositoryMeta::default()),
            Err(e) => Err(ErrorKind::Io(e).into()),
        }
    }

    async fn write_meta(&self, dir: &Path, meta: &RepositoryMeta) -> Result<()> {
        let meta_dir = dir.join(META_DIR);
        fs::create_dir_all(&meta_dir).await.map_err(ErrorKind::Io)?;
        let data = serde_json::to_vec_pretty(meta)
            .or_raise(|| ErrorKind::Backend("unable to serialize repository metadata".to_string()))?;
        fs::write(meta_dir.join(META_FILE), data).await.map_err(ErrorKind::Io)?;
        Ok(())
    }

    fn remote_repository(&self, owner: &str, name: &str, meta: RepositoryMeta) -> RemoteRepository {
        RemoteRepository {
            url: url::repository_url(&self.api_base, &format!("{owner}/{name}")),
            name: name.to_string(),
            owner: Owner {
                login: owner.to_string(),
            },
            topics: meta.topics,
            description: meta.description,
            is_template: meta.is_template,
        }
    }

    async fn load_repository(&self, owner: &str, name: &str) -> Result<RemoteRepository> {
        let dir = self.repository_dir(owner, name)?;
        if !fs::try_exists(&dir).await.map_err(ErrorKind::Io)? {
            exn::bail!(ErrorKind::NotFound(format!("{owner}/{name}")));
        }
        let meta = self.read_meta(&dir).await?;
        Ok(self.remote_repository(owner, name, meta))
    }

    async fn subdirectories(dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(ErrorKind::Io(e).into()),
        };
        while let Some(entry) = entries.next_entry().await.map_err(ErrorKind::Io)? {
            let is_dir = entry.file_type().await.map_err(ErrorKind::Io)?.is_dir();
            let name = entry.file_name().to_string_lossy().to_string();
            if is_dir && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Every file below `start`, relative to `start`, skipping bookkeeping.
    fn walk(start: PathBuf) -> impl Stream<Item = Result<PathBuf>> {
        stream! {
            let mut stack = vec![start.clone()];
            while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        yield Err(exn::Exn::from(ErrorKind::Io(e)));
                        continue;
                    },
                };
                loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break,
                        Err(e) => {
                            yield Err(exn::Exn::from(ErrorKind::Io(e)));
                            continue;
                        },
                    };
                    let path = entry.path();
                    if entry.file_name() == META_DIR {
                        continue;
                    }
                    match entry.file_type().await {
                        Ok(kind) if kind.is_dir() => stack.push(path),
                        Ok(kind) if kind.is_file() => {
                            if let Ok(relative) = path.strip_prefix(&start) {
                                yield Ok(relative.to_path_buf());
                            }
                        },
                        // Broken symlinks and friends.
                        Ok(_) => {},
                        Err(e) => yield Err(exn::Exn::from(ErrorKind::Io(e))),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Gateway for LocalGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_file(&self, url: &str) -> Result<RemoteFile> {
        let (parsed, location) = self.file_location(url)?;
        let data = fs::read(&location).await.map_err(|e| Self::map_io_error(e, url))?;
        Ok(RemoteFile {
            url: url::strip_ref(url).to_string(),
            path: parsed.path,
            sha: Self::sha(&data),
            content: encoding::encode_bytes(&data),
        })
    }

    async fn fetch_repository(&self, url: &str) -> Result<RemoteRepository> {
        let (owner, name) = url::parse_repository(&self.api_base, url)?;
        self.load_repository(&owner, &name).await
    }

    async fn list_directory(&self, repository_url: &str, directory: &str) -> Result<Vec<DirEntry>> {
        let (owner, name) = url::parse_repository(&self.api_base, repository_url)?;
        let base = self.repository_dir(&owner, &name)?;
        let relative = match directory.trim_matches('/') {
            "" => PathBuf::new(),
            dir => validate_path(dir)?,
        };
        let mut entries = match fs::read_dir(base.join(&relative)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ErrorKind::Io(e).into()),
        };
        let mut listing = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(ErrorKind::Io)? {
            let entry_name = entry.file_name().to_string_lossy().to_string();
            if entry_name == META_DIR {
                continue;
            }
            let kind = match entry.file_type().await.map_err(ErrorKind::Io)? {
                t if t.is_dir() => EntryKind::Dir,
                t if t.is_file() => EntryKind::File,
                _ => continue,
            };
            let path = relative.join(&entry_name).to_string_lossy().replace('\\', "/");
            listing.push(DirEntry {
                url: url::contents_url(repository_url, &path),
                name: entry_name,
                path,
                kind,
            });
        }
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<RemoteRepository>> {
        let owners = match &query.owner {
            Some(owner) => vec![owner.clone()],
            None => Self::subdirectories(&self.root).await?,
        };
        let mut found = Vec::new();
        for owner in owners {
            for name in Self::subdirectories(&self.root.join(&owner)).await? {
                let repository = self.load_repository(&owner, &name).await?;
                if query.matches(&repository) {
                    found.push(repository);
                }
            }
        }
        Ok(found)
    }

    async fn create_from_template(&self, name: &str, template_url: &str) -> Result<RemoteRepository> {
        let (template_owner, template_name) = url::parse_repository(&self.api_base, template_url)?;
        let source = self.repository_dir(&template_owner, &template_name)?;
        let template = self.load_repository(&template_owner, &template_name).await?;
        let target = self.repository_dir(&self.login, name)?;
        if fs::try_exists(&target).await.map_err(ErrorKind::Io)? {
            exn::bail!(ErrorKind::AlreadyExists(format!("{}/{name}", self.login)));
        }
        let files: Vec<PathBuf> = Self::walk(source.clone()).try_collect().await?;
        for relative in files {
            let destination = target.join(&relative);
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
            }
            fs::copy(source.join(&relative), &destination).await.map_err(ErrorKind::Io)?;
        }
        fs::create_dir_all(&target).await.map_err(ErrorKind::Io)?;
        let meta = RepositoryMeta {
            description: template.description,
            ..RepositoryMeta::default()
        };
        self.write_meta(&target, &meta).await?;
        tracing::info!(gateway = %self.name, template = %template_url, name, "created repository from template");
        self.load_repository(&self.login, name).await
    }

    async fn write_file(&self, request: WriteRequest) -> Result<RemoteFile> {
        let (parsed, location) = self.file_location(&request.url)?;
        self.load_repository(&parsed.owner, &parsed.name).await?;
        let current = Self::current_sha(&location).await?;
        match (current.as_deref(), request.sha.as_deref()) {
            (None, None) => {},
            (Some(current), Some(given)) if current == given => {},
            _ => exn::bail!(ErrorKind::PreconditionFailed(request.url)),
        }
        let data = encoding::decode_bytes(&request.content)
            .or_raise(|| ErrorKind::Backend(format!("unreadable content for `{}`", request.url)))?;
        if let Some(parent) = location.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, &request.url))?;
        }
        fs::write(&location, &data).await.map_err(|e| Self::map_io_error(e, &request.url))?;
        tracing::debug!(gateway = %self.name, url = %request.url, message = %request.message, "wrote file");
        Ok(RemoteFile {
            url: url::strip_ref(&request.url).to_string(),
            path: parsed.path,
            sha: Self::sha(&data),
            content: encoding::encode_bytes(&data),
        })
    }

    async fn delete_file(&self, url: &str, sha: &str, message: &str) -> Result<()> {
        let (_, location) = self.file_location(url)?;
        match Self::current_sha(&location).await? {
            None => exn::bail!(ErrorKind::NotFound(url.to_string())),
            Some(current) if current != sha => exn::bail!(ErrorKind::PreconditionFailed(url.to_string())),
            Some(_) => {},
        }
        fs::remove_file(&location).await.map_err(|e| Self::map_io_error(e, url))?;
        tracing::debug!(gateway = %self.name, url, message, "deleted file");
        Ok(())
    }

    async fn topics(&self, repository_url: &str) -> Result<Vec<String>> {
        Ok(self.fetch_repository(repository_url).await?.topics)
    }

    async fn set_topics(&self, repository_url: &str, topics: &[String]) -> Result<Vec<String>> {
        let (owner, name) = url::parse_repository(&self.api_base, repository_url)?;
        self.load_repository(&owner, &name).await?;
        let dir = self.repository_dir(&owner, &name)?;
        let meta = RepositoryMeta {
            topics: topics.to_vec(),
            ..self.read_meta(&dir).await?
        };
        self.write_meta(&dir, &meta).await?;
        Ok(meta.topics)
    }

    async fn build_status(&self, repository_url: &str) -> Result<BuildStatus> {
        let (owner, name) = url::parse_repository(&self.api_base, repository_url)?;
        self.load_repository(&owner, &name).await?;
        Ok(self.read_meta(&self.repository_dir(&owner, &name)?).await?.build_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const API: &str = "https://api.github.com/repos";

    async fn gateway() -> (tempfile::TempDir, LocalGateway) {
        let temp_dir = tempfile::tempdir().unwrap();
        let gateway = LocalGateway::new("local", temp_dir.path(), API, "me").unwrap();
        gateway.register("alice", "lesson", &["open-data".to_string()], false).await.unwrap();
        (temp_dir, gateway)
    }

    fn file_url(repo: &str, path: &str) -> String {
        format!("{API}/{repo}/contents/{path}")
    }

    async fn create(gateway: &LocalGateway, url: &str, content: &str) -> RemoteFile {
        gateway
            .write_file(WriteRequest {
                url: url.to_string(),
                path: String::new(),
                content: encoding::encode(content),
                sha: None,
                message: "create".to_string(),
            })
            .await
            .unwrap()
    }

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(LocalGateway::new("local", temp_dir.path(), API, "me").is_ok());
        assert!(LocalGateway::new("local", "relative/path", API, "me").is_err());
    }

    #[tokio::test]
    async fn test_write_and_fetch() {
        let (_dir, gateway) = gateway().await;
        let url = file_url("alice/lesson", "_episodes/01-intro.md");
        let written = create(&gateway, &url, "---\ntitle: A\n---\nBody").await;
        assert_eq!(written.path, "_episodes/01-intro.md");
        let fetched = gateway.fetch_file(&format!("{url}?ref=main")).await.unwrap();
        assert_eq!(fetched, written);
        assert_eq!(encoding::decode(&fetched.content).unwrap(), "---\ntitle: A\n---\nBody");
    }

    #[tokio::test]
    async fn test_write_requires_current_sha() {
        let (_dir, gateway) = gateway().await;
        let url = file_url("alice/lesson", "notes.md");
        let first = create(&gateway, &url, "one").await;
        let mut request = WriteRequest {
            url: url.clone(),
            path: "notes.md".to_string(),
            content: encoding::encode("two"),
            sha: None,
            message: "update".to_string(),
        };
        // Creating over an existing file
        let err = gateway.write_file(request.clone()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::PreconditionFailed(_)));
        // Stale token
        request.sha = Some("stale".to_string());
        let err = gateway.write_file(request.clone()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::PreconditionFailed(_)));
        // Current token
        request.sha = Some(first.sha.clone());
        let second = gateway.write_file(request).await.unwrap();
        assert_ne!(second.sha, first.sha);
    }

    #[tokio::test]
    async fn test_write_into_unknown_repository() {
        let (_dir, gateway) = gateway().await;
        let err = gateway
            .write_file(WriteRequest {
                url: file_url("nobody/nothing", "a.md"),
                path: "a.md".to_string(),
                content: encoding::encode("x"),
                sha: None,
                message: "create".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, gateway) = gateway().await;
        let url = file_url("alice/lesson", "fig/a.png");
        let file = create(&gateway, &url, "png").await;
        let err = gateway.delete_file(&url, "stale", "rm").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::PreconditionFailed(_)));
        gateway.delete_file(&url, &file.sha, "rm").await.unwrap();
        let err = gateway.fetch_file(&url).await.unwrap_err();
        assert!(err.is_not_found());
        let err = gateway.delete_file(&url, &file.sha, "rm").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_directory() {
        let (_dir, gateway) = gateway().await;
        create(&gateway, &file_url("alice/lesson", "_episodes/02.md"), "b").await;
        create(&gateway, &file_url("alice/lesson", "_episodes/01.md"), "a").await;
        create(&gateway, &file_url("alice/lesson", "_episodes/img/x.png"), "x").await;
        let repo = format!("{API}/alice/lesson");
        let listing = gateway.list_directory(&repo, "_episodes").await.unwrap();
        let names: Vec<_> = listing.iter().map(|e| (e.name.as_str(), e.kind)).collect();
        assert_eq!(names, vec![("01.md", EntryKind::File), ("02.md", EntryKind::File), ("img", EntryKind::Dir)]);
        assert_eq!(listing[0].url, file_url("alice/lesson", "_episodes/01.md"));
        // Missing directories list as empty
        assert!(gateway.list_directory(&repo, "_episodes_rmd").await.unwrap().is_empty());
        // Bookkeeping is hidden
        let root = gateway.list_directory(&repo, "").await.unwrap();
        assert!(root.iter().all(|e| e.name != META_DIR));
    }

    #[tokio::test]
    async fn test_metadata_is_not_addressable() {
        let (_dir, gateway) = gateway().await;
        let err = gateway.fetch_file(&file_url("alice/lesson", ".docmirror/repository.json")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidUrl(_)));
        let err = gateway.fetch_file(&file_url("alice/lesson", "../../etc/passwd")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_search_and_topics() {
        let (_dir, gateway) = gateway().await;
        gateway.register("bob", "other", &["open-code".to_string()], false).await.unwrap();
        let hits = gateway.search(&SearchQuery::topics(["open-data"])).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, format!("{API}/alice/lesson"));
        let hits = gateway.search(&SearchQuery::default().owner("bob")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "other");

        let repo = format!("{API}/bob/other");
        let set = gateway.set_topics(&repo, &["preprints".to_string()]).await.unwrap();
        assert_eq!(set, vec!["preprints".to_string()]);
        assert_eq!(gateway.topics(&repo).await.unwrap(), vec!["preprints".to_string()]);
        assert_eq!(gateway.build_status(&repo).await.unwrap(), BuildStatus::Unknown);
    }

    #[tokio::test]
    async fn test_create_from_template() {
        let (_dir, gateway) = gateway().await;
        gateway.register("org", "template", &["template".to_string()], true).await.unwrap();
        create(&gateway, &file_url("org/template", "_config.yml"), "title: T\n").await;
        create(&gateway, &file_url("org/template", "_episodes/01.md"), "ep").await;
        let created = gateway.create_from_template("workshop", &format!("{API}/org/template")).await.unwrap();
        assert_eq!(created.url, format!("{API}/me/workshop"));
        assert_eq!(created.owner.login, "me");
        assert!(!created.is_template);
        let ep = gateway.fetch_file(&file_url("me/workshop", "_episodes/01.md")).await.unwrap();
        assert_eq!(encoding::decode(&ep.content).unwrap(), "ep");
        let err = gateway.create_from_template("workshop", &format!("{API}/org/template")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_copy_file() {
        let (_dir, gateway) = gateway().await;
        gateway.register("bob", "other", &[], false).await.unwrap();
        let from = file_url("bob/other", "fig/a.png");
        let to = file_url("alice/lesson", "installed/bob/other/fig/a.png");
        create(&gateway, &from, "original").await;
        let copied = gateway.copy_file(&from, &to, true, "copy").await.unwrap();
        assert_eq!(copied.path, "installed/bob/other/fig/a.png");
        // Returning the existing copy leaves it untouched
        create(&gateway, &file_url("bob/other", "fig/b.png"), "changed").await;
        let again = gateway.copy_file(&file_url("bob/other", "fig/b.png"), &to, true, "copy").await.unwrap();
        assert_eq!(again.sha, copied.sha);
    }
}
