//! Operations that reconcile the mirror with the remote side.

use crate::error::{ErrorKind, Result};
use crate::models::{FetchOptions, File, NewFile, Repository, RepositoryView, SaveSummary};
use crate::store::Store;
use docmirror_asyncutils::settle_all;
use docmirror_codec::encoding;
use docmirror_gateway::{BuildStatus, EntryKind, RemoteFile, SearchQuery, WriteRequest, url, validate_path};
use exn::ResultExt;

const FIND_REPOSITORIES: &str = "findRepositories";
const FIND_TEMPLATES: &str = "findTemplates";
const CREATE_REPOSITORY: &str = "createRepository";

impl Store {
    /// Write a file to the remote side and replace the local record with what
    /// the remote now holds.
    ///
    /// Pushing the main repository's config file with a topic the repository
    /// isn't tagged with also updates the repository's topics.
    pub async fn push_file(&self, url: &str) -> Result<Option<File>> {
        let file = self.require_file(url)?;
        let Some(guard) = self.busy.acquire(&file.url) else {
            tracing::debug!(url = %file.url, "push skipped, file is busy");
            return Ok(None);
        };
        let request = WriteRequest {
            url: file.url.clone(),
            path: file.path.clone(),
            content: encoding::encode(&file.content),
            sha: file.sha.clone(),
            message: self.config.commit_message(&file.path),
        };
        let pushed = match self.gateway.write_file(request).await {
            Ok(pushed) => pushed,
            Err(err) => {
                self.record_error("push_file", &file.url, &err);
                return Ok(None);
            },
        };
        let updated = self.add_file(
            NewFile {
                url: file.url.clone(),
                ..NewFile::from(pushed)
            },
            true,
        )?;
        drop(guard);
        tracing::info!(path = %updated.path, "pushed file");

        if updated.path == self.config.repository.config_file
            && let Some(main) = self.main_repository()
            && url::is_member(&updated.url, &main.url)
            && let Some(topic) = updated.front_matter.get_str("topic")
            && !main.topics.iter().any(|t| t == topic)
            && let Err(err) = self.set_topics(&[topic.to_string()]).await
        {
            self.record_error("set_topics", &main.url, &err);
        }
        Ok(Some(updated))
    }

    /// Fetch a file without storing it.
    pub async fn pull_url(&self, url: &str) -> Result<Option<RemoteFile>> {
        if self.busy.is_busy(url) {
            tracing::debug!(url, "pull skipped, resource is busy");
            return Ok(None);
        }
        match self.gateway.fetch_file(url).await {
            Ok(file) => Ok(Some(file)),
            Err(err) => {
                self.record_error("pull_url", url, &err);
                Ok(None)
            },
        }
    }

    /// Fetch a repository and make it the main one.
    pub async fn load_repository(&self, url: &str) -> Result<Option<RepositoryView>> {
        let Some(_guard) = self.busy.acquire(url) else {
            tracing::debug!(url, "load skipped, repository is busy");
            return Ok(None);
        };
        let remote = match self.gateway.fetch_repository(url).await {
            Ok(remote) => remote,
            Err(err) => {
                self.record_error("load_repository", url, &err);
                return Ok(None);
            },
        };
        let repository = Repository::from(remote);
        let repository_url = repository.url.clone();
        self.add_repository(repository)?;
        self.set_main_repository(&repository_url)?;
        tracing::info!(url = %repository_url, "loaded main repository");
        self.repository(Some(&repository_url))
    }

    /// Search for repositories and add every hit except the main repository.
    pub async fn find_repositories(&self, query: &SearchQuery) -> Result<Option<Vec<RepositoryView>>> {
        let Some(_guard) = self.busy.acquire(FIND_REPOSITORIES) else {
            tracing::debug!("search skipped, already searching");
            return Ok(None);
        };
        let hits = match self.gateway.search(query).await {
            Ok(hits) => hits,
            Err(err) => {
                self.record_error("find_repositories", FIND_REPOSITORIES, &err);
                return Ok(None);
            },
        };
        let main_url = self.main_repository().map(|m| m.url).unwrap_or_default();
        let mut urls = Vec::with_capacity(hits.len());
        for hit in hits {
            let repository = Repository::from(hit);
            urls.push(repository.url.clone());
            if repository.url != main_url {
                self.add_repository(repository)?;
            }
        }
        tracing::debug!(count = urls.len(), "found repositories");
        let mut views = Vec::with_capacity(urls.len());
        for url in urls {
            if let Ok(Some(view)) = self.repository(Some(&url)) {
                views.push(view);
            }
        }
        Ok(Some(views))
    }

    /// Search for template repositories, replacing the known template list.
    pub async fn find_templates(&self) -> Result<Option<Vec<Repository>>> {
        let Some(_guard) = self.busy.acquire(FIND_TEMPLATES) else {
            return Ok(None);
        };
        let query = SearchQuery::topics([self.config.repository.template_topic.as_str()]);
        match self.gateway.search(&query).await {
            Ok(hits) => {
                let templates: Vec<Repository> = hits.into_iter().map(Repository::from).collect();
                self.set_templates(templates.clone());
                Ok(Some(templates))
            },
            Err(err) => {
                self.record_error("find_templates", FIND_TEMPLATES, &err);
                Ok(None)
            },
        }
    }

    /// Fetch a repository's episodes and well-known files into the store.
    ///
    /// Individual fetch failures are recorded and skipped; missing extra
    /// files (a repository without notes, say) are not failures.
    pub async fn find_repository_files(&self, url: &str, options: FetchOptions) -> Result<Option<RepositoryView>> {
        let repository = match self.repository(Some(url))? {
            Some(view) => view.repository,
            None => exn::bail!(ErrorKind::UnknownRepository(url.to_string())),
        };
        let Some(guard) = self.busy.acquire(&repository.url) else {
            tracing::debug!(url, "file search skipped, repository is busy");
            return Ok(None);
        };

        let mut targets: Vec<(String, bool)> = Vec::new();
        if options.episodes {
            let listings = settle_all(
                self.config
                    .episodes
                    .directories
                    .iter()
                    .map(|dir| (dir.as_str(), self.gateway.list_directory(&repository.url, dir))),
            )
            .await;
            for (dir, err) in &listings.failures {
                self.record_error("list_directory", &url::contents_url(&repository.url, dir), err);
            }
            targets.extend(
                listings
                    .successes
                    .into_iter()
                    .flat_map(|(_, entries)| entries)
                    .filter(|e| e.kind == EntryKind::File && !e.name.starts_with(['.', '_']))
                    .map(|e| (e.path, false)),
            );
        }
        if options.extra_files {
            let settings = &self.config.repository;
            targets.extend(
                settings
                    .topics
                    .iter()
                    .chain([&settings.fallback_topic])
                    .map(|topic| (format!("{}/{topic}.md", settings.intro_directory), true)),
            );
            targets.push((settings.notes_file.clone(), true));
            targets.push((settings.config_file.clone(), true));
        }

        let urls: Vec<String> = targets.iter().map(|(path, _)| url::contents_url(&repository.url, path)).collect();
        let fetched = settle_all(
            targets
                .iter()
                .zip(&urls)
                .map(|((path, extra), file_url)| ((path.as_str(), *extra), self.gateway.fetch_file(file_url))),
        )
        .await;
        for ((path, extra), err) in &fetched.failures {
            if *extra && err.is_not_found() {
                tracing::debug!(path, "optional file not present");
            } else {
                self.record_error("fetch_file", &url::contents_url(&repository.url, path), err);
            }
        }
        let mut added = 0;
        for (_, remote) in fetched.successes {
            if !options.overwrite && self.file(&remote.url).is_some() {
                continue;
            }
            self.add_file(NewFile::from(remote), true)?;
            added += 1;
        }
        drop(guard);
        tracing::info!(url = %repository.url, added, failed = fetched.failures.len(), "fetched repository files");
        self.repository(Some(&repository.url))
    }

    /// Create a repository from a template and make it the main one.
    pub async fn create_repository(&self, name: &str, template: &str) -> Result<Option<RepositoryView>> {
        if name.trim().is_empty() {
            exn::bail!(ErrorKind::MissingArgument("name"));
        }
        if template.trim().is_empty() {
            exn::bail!(ErrorKind::MissingArgument("template"));
        }
        if self.main_repository().is_some() {
            exn::bail!(ErrorKind::MultipleMainRepositories);
        }
        let Some(_guard) = self.busy.acquire(CREATE_REPOSITORY) else {
            return Ok(None);
        };
        let created = match self.gateway.create_from_template(name, template).await {
            Ok(created) => created,
            Err(err) => {
                self.record_error("create_repository", template, &err);
                return Ok(None);
            },
        };
        let repository = Repository::from(created).main();
        let repository_url = repository.url.clone();
        self.add_repository(repository)?;
        tracing::info!(url = %repository_url, template, "created repository");
        self.find_repository_files(&repository_url, FetchOptions::default()).await
    }

    /// Replace the main repository's topics.
    ///
    /// Blank entries are ignored; anything not in the configured topic list
    /// is rejected.
    pub async fn set_topics(&self, topics: &[String]) -> Result<Option<Repository>> {
        let main = self.require_main()?;
        let known = &self.config.repository.topics;
        let topics: Vec<String> = topics.iter().filter(|t| !t.trim().is_empty()).cloned().collect();
        let unknown: Vec<String> = topics.iter().filter(|t| !known.contains(t)).cloned().collect();
        if !unknown.is_empty() {
            exn::bail!(ErrorKind::UnknownTopics(unknown));
        }
        let Some(_guard) = self.busy.acquire(&main.url) else {
            tracing::debug!(url = %main.url, "topic update skipped, repository is busy");
            return Ok(None);
        };
        let topics = match self.gateway.set_topics(&main.url, &topics).await {
            Ok(topics) => topics,
            Err(err) => {
                self.record_error("set_topics", &main.url, &err);
                return Ok(None);
            },
        };
        let updated = Repository { topics, ..main };
        self.add_repository(updated.clone())?;
        tracing::info!(url = %updated.url, topics = ?updated.topics, "updated topics");
        Ok(Some(updated))
    }

    /// Push every changed file of the main repository.
    pub async fn save_repository_changes(&self) -> Result<SaveSummary> {
        let main = self.require_main()?;
        let changed: Vec<String> = self
            .files_by_filter(|f| f.has_changed() && url::is_member(&f.url, &main.url))
            .into_iter()
            .map(|f| f.url)
            .collect();
        let results = settle_all(changed.iter().map(|url| (url.clone(), self.push_file(url)))).await;
        let mut summary = SaveSummary::default();
        for (url, pushed) in results.successes {
            match pushed {
                Some(_) => summary.successes.push(url),
                None => summary.failures.push(url),
            }
        }
        for (url, err) in results.failures {
            tracing::warn!(url = %url, error = %err, "unable to push file");
            summary.failures.push(url);
        }
        tracing::info!(successes = summary.successes.len(), failures = summary.failures.len(), "saved changes");
        Ok(summary)
    }

    /// Site build state of the main repository.
    pub async fn build_status(&self) -> Result<BuildStatus> {
        let main = self.require_main()?;
        self.gateway.build_status(&main.url).await.or_raise(|| ErrorKind::Gateway)
    }

    /// Write raw bytes to `path` in the main repository, replacing whatever is there.
    pub async fn upload_asset(&self, path: &str, data: &[u8]) -> Result<Option<RemoteFile>> {
        let main = self.require_main()?;
        let path = validate_path(path).or_raise(|| ErrorKind::InvalidRemoteUrl(path.to_string()))?;
        let path = path.to_string_lossy().replace('\\', "/");
        let asset_url = url::contents_url(&main.url, &path);
        let Some(_guard) = self.busy.acquire(&asset_url) else {
            return Ok(None);
        };
        let sha = match self.gateway.fetch_file(&asset_url).await {
            Ok(existing) => Some(existing.sha),
            Err(err) if err.is_not_found() => None,
            Err(err) => {
                self.record_error("upload_asset", &asset_url, &err);
                return Ok(None);
            },
        };
        let request = WriteRequest {
            url: asset_url.clone(),
            message: self.config.commit_message(&path),
            path,
            content: encoding::encode_bytes(data),
            sha,
        };
        match self.gateway.write_file(request).await {
            Ok(written) => Ok(Some(written)),
            Err(err) => {
                self.record_error("upload_asset", &asset_url, &err);
                Ok(None)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::models::FetchOptions;
    use crate::test_support::{API, main_store, other_file};
    use docmirror_gateway::backend::MockGateway;
    use docmirror_gateway::{BuildStatus, Gateway, SearchQuery};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_push_file() {
        let (store, gateway) = main_store().await;
        let url = gateway.file_url("me/workshop", "_episodes/01-intro.md");
        let before = store.file(&url).unwrap();
        store.set_file_content(&url, "---\ntitle: Changed\n---\nNew").unwrap();
        assert!(store.has_changed(&url).unwrap());
        let pushed = store.push_file(&url).await.unwrap().unwrap();
        assert!(!pushed.has_changed());
        assert_ne!(pushed.sha, before.sha);
        assert_eq!(gateway.content(&url).await.as_deref(), Some("---\ntitle: Changed\n---\nNew"));
        assert!(!store.is_busy(&url));
    }

    #[tokio::test]
    async fn test_push_file_busy() {
        let (store, gateway) = main_store().await;
        let url = gateway.file_url("me/workshop", "_episodes/01-intro.md");
        store.set_file_content(&url, "changed").unwrap();
        let (first, second) = tokio::join!(store.push_file(&url), store.push_file(&url));
        let results = [first.unwrap(), second.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_some()).count(), 1);
        assert_eq!(gateway.calls("write_file", &url).await, 1);
    }

    #[tokio::test]
    async fn test_push_file_failure_is_recorded() {
        let (store, gateway) = main_store().await;
        let url = gateway.file_url("me/workshop", "_episodes/01-intro.md");
        store.set_file_content(&url, "changed").unwrap();
        gateway.fail(url.clone()).await;
        assert!(store.push_file(&url).await.unwrap().is_none());
        assert!(!store.is_busy(&url));
        assert!(store.has_changed(&url).unwrap());
        assert_eq!(store.last_error().unwrap().operation, "push_file");
        // Retry once the remote recovers
        gateway.recover(&url).await;
        assert!(store.push_file(&url).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_push_stale_sha_is_not_overridden() {
        let (store, gateway) = main_store().await;
        let url = gateway.file_url("me/workshop", "_config.yml");
        // Someone else edits the file remotely
        let remote = gateway.fetch_file(&url).await.unwrap();
        gateway
            .write_file(docmirror_gateway::WriteRequest {
                url: url.clone(),
                path: remote.path,
                content: docmirror_codec::encoding::encode("title: Theirs\n"),
                sha: Some(remote.sha),
                message: "edit".to_string(),
            })
            .await
            .unwrap();
        store.set_file_content(&url, "title: Mine\n").unwrap();
        assert!(store.push_file(&url).await.unwrap().is_none());
        assert!(store.last_error().unwrap().message.contains("precondition"));
        assert_eq!(gateway.content(&url).await.as_deref(), Some("title: Theirs\n"));
    }

    #[tokio::test]
    async fn test_push_config_updates_topics() {
        let (store, gateway) = main_store().await;
        let url = gateway.file_url("me/workshop", "_config.yml");
        store
            .set_file_content(&url, "workshop_id: w\ntitle: W\ntopic: preprints\n")
            .unwrap();
        store.push_file(&url).await.unwrap().unwrap();
        assert_eq!(store.main_repository().unwrap().topics, vec!["preprints".to_string()]);
        assert_eq!(gateway.topics(&gateway.repository_url("me/workshop")).await.unwrap(), vec!["preprints"]);
    }

    #[tokio::test]
    async fn test_pull_url() {
        let (store, gateway) = main_store().await;
        let url = other_file(&gateway);
        let remote = store.pull_url(&url).await.unwrap().unwrap();
        assert_eq!(remote.path, "_episodes/02-data.md");
        // Not stored
        assert!(store.file(&url).is_none());
        assert!(store.pull_url(&format!("{API}/nobody/nothing/contents/x.md")).await.unwrap().is_none());
        assert_eq!(store.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_find_repositories() {
        let (store, gateway) = main_store().await;
        let views = store.find_repositories(&SearchQuery::topics(["open-data"])).await.unwrap().unwrap();
        let names: Vec<_> = views.iter().map(|v| v.repository.name.as_str()).collect();
        assert_eq!(names, vec!["workshop", "lesson"]);
        // The main repository is not replaced
        assert!(store.main_repository().unwrap().is_main);
        assert_eq!(store.repositories_by_filter(|_| true).len(), 2);
        assert_eq!(gateway.total_calls("search").await, 1);
    }

    #[tokio::test]
    async fn test_find_templates() {
        let gateway = Arc::new(
            MockGateway::default()
                .with_repository("org", "template", ["ukrn-wb-template"])
                .with_repository("org", "lesson", ["open-data"]),
        );
        let store = crate::Store::new(gateway, docmirror_config::Config::default());
        let templates = store.find_templates().await.unwrap().unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(store.templates()[0].name, "template");
    }

    #[tokio::test]
    async fn test_find_repository_files() {
        let (store, gateway) = main_store().await;
        let repo = gateway.repository_url("me/workshop");
        let view = store.repository(Some(&repo)).unwrap().unwrap();
        let paths: Vec<_> = view.files.iter().map(|f| f.path.as_str()).collect();
        // Hidden-prefixed names and sub-directories are not fetched
        assert_eq!(
            paths,
            vec![
                "_config.yml",
                "_episodes/01-intro.md",
                "_includes/intro/topic-intros/open-data.md",
                "notes.md",
            ]
        );
        assert!(store.errors().is_empty());

        // Without overwrite, local edits survive a refetch
        let url = gateway.file_url("me/workshop", "notes.md");
        store.set_file_content(&url, "local").unwrap();
        let options = FetchOptions {
            overwrite: false,
            ..FetchOptions::default()
        };
        store.find_repository_files(&repo, options).await.unwrap().unwrap();
        assert_eq!(store.file(&url).unwrap().content, "local");
        store.find_repository_files(&repo, FetchOptions::default()).await.unwrap().unwrap();
        assert_eq!(store.file(&url).unwrap().content, "Notes");
    }

    #[tokio::test]
    async fn test_find_repository_files_partial_failure() {
        let (store, gateway) = main_store().await;
        let repo = gateway.repository_url("me/workshop");
        let broken = gateway.file_url("me/workshop", "notes.md");
        gateway.fail(broken.clone()).await;
        store.remove_file(&broken).unwrap();
        let view = store.find_repository_files(&repo, FetchOptions::default()).await.unwrap().unwrap();
        assert!(view.notes.is_none());
        assert!(view.config.is_some());
        assert_eq!(store.errors().len(), 1);
        assert_eq!(store.last_error().unwrap().target, broken);
    }

    #[tokio::test]
    async fn test_find_repository_files_unknown() {
        let (store, _) = main_store().await;
        let err = store
            .find_repository_files(&format!("{API}/me/unknown"), FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownRepository(_)));
    }

    #[tokio::test]
    async fn test_create_repository() {
        let gateway = Arc::new(
            MockGateway::default()
                .with_repository("org", "template", ["ukrn-wb-template"])
                .with_file("org/template", "_config.yml", "title: Template\n")
                .with_file("org/template", "_episodes/01.md", "---\norder: 1\n---\nOne"),
        );
        let store = crate::Store::new(gateway.clone(), docmirror_config::Config::default());
        let err = store.create_repository("", "x").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MissingArgument("name")));
        let view = store
            .create_repository("mine", &gateway.repository_url("org/template"))
            .await
            .unwrap()
            .unwrap();
        assert!(view.repository.is_main);
        assert_eq!(view.repository.url, gateway.repository_url("me/mine"));
        assert_eq!(view.episodes.len(), 1);
        let err = store.create_repository("again", "x").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MultipleMainRepositories));
    }

    #[tokio::test]
    async fn test_set_topics() {
        let (store, gateway) = main_store().await;
        let err = store.set_topics(&["not-a-topic".to_string()]).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownTopics(t) if t == &["not-a-topic".to_string()]));
        let updated = store
            .set_topics(&["open-code".to_string(), " ".to_string()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.topics, vec!["open-code".to_string()]);
        assert_eq!(gateway.topics(&updated.url).await.unwrap(), vec!["open-code"]);
    }

    #[tokio::test]
    async fn test_save_repository_changes() {
        let (store, gateway) = main_store().await;
        let intro = gateway.file_url("me/workshop", "_episodes/01-intro.md");
        let notes = gateway.file_url("me/workshop", "notes.md");
        store.set_file_content(&intro, "one").unwrap();
        store.set_file_content(&notes, "two").unwrap();
        gateway.fail(notes.clone()).await;
        let summary = store.save_repository_changes().await.unwrap();
        assert_eq!(summary.successes, vec![intro]);
        assert_eq!(summary.failures, vec![notes]);
    }

    #[tokio::test]
    async fn test_build_status() {
        let (store, gateway) = main_store().await;
        assert_eq!(store.build_status().await.unwrap(), BuildStatus::Unknown);
        gateway.set_build_status(&gateway.repository_url("me/workshop"), BuildStatus::Built).await;
        assert_eq!(store.build_status().await.unwrap(), BuildStatus::Built);
    }

    #[tokio::test]
    async fn test_upload_asset() {
        let (store, gateway) = main_store().await;
        let first = store.upload_asset("/fig/new.png", b"png").await.unwrap().unwrap();
        assert_eq!(first.path, "fig/new.png");
        let second = store.upload_asset("fig/new.png", b"png2").await.unwrap().unwrap();
        assert_ne!(first.sha, second.sha);
        assert_eq!(gateway.content(&gateway.file_url("me/workshop", "fig/new.png")).await.as_deref(), Some("png2"));
        assert!(store.upload_asset("../escape.png", b"x").await.is_err());
    }
}
